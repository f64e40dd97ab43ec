//! Error types for rate limiting.

use std::fmt;

use crate::{key::Scope, storage::StorageError};

/// Errors that can occur while building the rate limiter.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The quota configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The counter store could not be set up.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The quota configuration was rejected. Lists every problem found, not only the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rate limit configuration:{}", list_violations(.violations))]
pub struct ConfigError {
    violations: Vec<Violation>,
}

impl ConfigError {
    pub(crate) fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Every problem found in the configuration.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

fn list_violations(violations: &[Violation]) -> String {
    violations.iter().map(|violation| format!("\n  - {violation}")).collect()
}

/// A single problem in the quota configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Client the problem was found in.
    pub client: String,
    /// Scope the problem was found in, if it concerns one.
    pub scope: Option<Scope>,
    /// Horizon the problem was found in, if it concerns one.
    pub horizon: Option<String>,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client '{}'", self.client)?;

        if let Some(scope) = &self.scope {
            write!(f, ", scope '{scope}'")?;
        }

        if let Some(horizon) = &self.horizon {
            write!(f, ", horizon '{horizon}'")?;
        }

        write!(f, ": {}", self.message)
    }
}
