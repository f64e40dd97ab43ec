//! Tollgate configuration structures to map the tollgate.toml configuration.

#![deny(missing_docs)]

mod client_identification;
mod client_identity;
mod loader;
mod rate_limit;
mod server;
mod telemetry;

use std::path::Path;

pub use client_identification::ClientIdentificationConfig;
pub use client_identity::ClientIdentity;
pub use rate_limit::*;
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig, TlsServerConfig};
pub use telemetry::{ExportersConfig, OtlpExporterConfig, OtlpProtocol, TelemetryConfig};

/// Main configuration structure for the Tollgate application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Telemetry configuration settings.
    pub telemetry: Option<TelemetryConfig>,
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// Dynamic strings such as `{{ env.REDIS_URL }}` are expanded before deserialization.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }
}
