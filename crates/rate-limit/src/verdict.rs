//! Outcome of a rate limit check.

use crate::key::Scope;

/// Whether a request may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request is within every matching quota.
    Allowed,
    /// The request must be rejected.
    Denied(Denial),
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// A counter went over its limit.
    LimitExceeded(LimitExceeded),
    /// The client has no configured quota and unknown clients are denied.
    UnknownClient {
        /// The client name, if the request carried one.
        client: Option<String>,
    },
}

impl Denial {
    /// Name of the rejected client, empty for anonymous requests.
    pub fn client(&self) -> &str {
        match self {
            Denial::LimitExceeded(exceeded) => &exceeded.client,
            Denial::UnknownClient { client } => client.as_deref().unwrap_or_default(),
        }
    }
}

/// The first counter found over its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitExceeded {
    /// Client the counter belongs to.
    pub client: String,
    /// Scope of the counter.
    pub scope: Scope,
    /// Horizon of the counter.
    pub horizon: String,
    /// Counter value after this request was charged.
    pub current_count: u64,
    /// Configured maximum for the window.
    pub max_allowed: u64,
}
