//! Runtime client identity type.
//!
//! The identity is resolved once per request by the identification layer and
//! carried in the request extensions for the admission gate to read.

/// The client a request was made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// The client name, as used for quota lookups.
    pub client_name: String,
}

impl ClientIdentity {
    /// Create an identity for the given client name.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}
