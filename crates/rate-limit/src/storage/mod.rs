//! Counter store backends.

use std::{future::Future, time::Duration};

use config::StorageConfig;

mod memory;
mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use redis::RedisStorage;

/// One counter to increment, with the window to apply if the counter has no expiry yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterIncrement {
    /// Rendered counter key.
    pub key: String,
    /// Expiry given to the counter when it is created.
    pub window: Duration,
}

impl CounterIncrement {
    /// A new increment of `key` with the given window.
    pub fn new(key: impl Into<String>, window: Duration) -> Self {
        Self {
            key: key.into(),
            window,
        }
    }
}

/// A store of fixed-window counters.
pub trait CounterStorage: Send + Sync {
    /// Increments every counter of the batch by one and returns the new values in input order.
    ///
    /// A counter without expiry, including one created by this call, gets its window as
    /// expiry. An existing expiry is never touched. The whole batch is applied atomically.
    fn increment_and_maybe_expire(
        &self,
        counters: &[CounterIncrement],
    ) -> impl Future<Output = Result<Vec<u64>, StorageError>> + Send;
}

/// Errors that can occur in storage backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The store could not be reached, the pool was exhausted, or the call timed out.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something other than one count per key.
    #[error("Unexpected counter store response: {0}")]
    Protocol(String),
}

/// The counter store selected in the configuration.
pub enum Storage {
    /// Counters kept in this process.
    Memory(InMemoryStorage),
    /// Counters kept in Redis, shared by every instance.
    Redis(RedisStorage),
}

impl Storage {
    /// Builds the configured backend. Redis does not need to be reachable yet.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Self::Memory(InMemoryStorage::new())),
            StorageConfig::Redis(redis) => Ok(Self::Redis(RedisStorage::new(redis).await?)),
        }
    }
}

impl CounterStorage for Storage {
    async fn increment_and_maybe_expire(&self, counters: &[CounterIncrement]) -> Result<Vec<u64>, StorageError> {
        match self {
            Storage::Memory(storage) => storage.increment_and_maybe_expire(counters).await,
            Storage::Redis(storage) => storage.increment_and_maybe_expire(counters).await,
        }
    }
}
