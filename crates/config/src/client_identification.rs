//! Client identification configuration.

use serde::Deserialize;

/// How the calling client is recognized on incoming requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientIdentificationConfig {
    /// HTTP header carrying the client name.
    pub http_header: String,
    /// Client name to assume when the header is missing.
    pub fallback_client: Option<String>,
}

impl Default for ClientIdentificationConfig {
    fn default() -> Self {
        Self {
            http_header: "X-Client-Name".to_string(),
            fallback_client: None,
        }
    }
}
