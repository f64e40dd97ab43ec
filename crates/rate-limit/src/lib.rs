//! Fixed-window request admission for Tollgate.
//!
//! Every request of a known client is counted against its quotas:
//! - the client total, always
//! - the request method, if the client has a quota for it
//! - the request path, if the client has a quota for it
//!
//! Each quota holds one or more horizons (minute, hour, week, ...), each a fixed window
//! with a maximum number of calls. Counters live in memory or in Redis, shared by every
//! instance.

#![deny(missing_docs)]

mod error;
mod key;
mod manager;
mod quota;
mod request;
mod storage;
mod verdict;

pub use error::{ConfigError, RateLimitError, Violation};
pub use key::{CounterKey, Horizons, Scope, builtin_horizon};
pub use manager::RateLimitManager;
pub use quota::{ClientQuota, HorizonLimit, Quotas, ScopeQuota};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use storage::{CounterIncrement, CounterStorage, InMemoryStorage, RedisStorage, Storage, StorageError};
pub use verdict::{Denial, LimitExceeded, Verdict};
