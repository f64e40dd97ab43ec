//! Redis counter storage, shared by every instance.

use std::time::Duration;

use config::RedisConfig;
use redis::{ErrorKind, RedisError, Script};

use super::{
    CounterIncrement, CounterStorage, StorageError,
    redis_pool::{Pool, create_pool},
};

/// Increments every key and gives a key its window only when it has no expiry.
///
/// KEYS are the counters, ARGV[i] is the window in seconds of KEYS[i]. Runs atomically.
const INCREMENT_SCRIPT: &str = r#"
local counts = {}

for i, key in ipairs(KEYS) do
    local count = redis.call('INCR', key)

    if redis.call('TTL', key) == -1 then
        redis.call('EXPIRE', key, ARGV[i])
    end

    counts[i] = count
end

return counts
"#;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed-window counters in Redis.
///
/// All keys of one request share the client hash tag, so the script also works against
/// Redis Cluster.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
    script: Script,
}

impl RedisStorage {
    /// Creates the connection pool. An unreachable server is logged, not returned.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Unavailable(format!("Failed to create Redis connection pool: {e}")))?;

        let storage = Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
            script: Script::new(INCREMENT_SCRIPT),
        };

        match storage.ping().await {
            Ok(()) => log::debug!("Connected to Redis for rate limit counters"),
            Err(e) => log::warn!("Redis is not reachable yet, the store_failure policy applies until it is: {e}"),
        }

        Ok(storage)
    }

    /// Checks that a connection can be taken from the pool and answers.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let round_trip = async {
            let mut conn = self.pool.get().await.map_err(pool_error)?;
            redis::cmd("PING").query_async::<String>(&mut *conn).await.map_err(redis_error)
        };

        self.bounded(round_trip).await.map(|_| ())
    }

    async fn bounded<T>(&self, round_trip: impl Future<Output = Result<T, StorageError>>) -> Result<T, StorageError> {
        match tokio::time::timeout(self.response_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unavailable(format!(
                "Redis did not answer within {:?}",
                self.response_timeout
            ))),
        }
    }
}

impl CounterStorage for RedisStorage {
    async fn increment_and_maybe_expire(&self, counters: &[CounterIncrement]) -> Result<Vec<u64>, StorageError> {
        if counters.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.script.prepare_invoke();

        for counter in counters {
            invocation
                .key(format!("{}{}", self.key_prefix, counter.key))
                .arg(counter.window.as_secs());
        }

        let round_trip = async {
            let mut conn = self.pool.get().await.map_err(pool_error)?;

            invocation
                .invoke_async::<Vec<i64>>(&mut *conn)
                .await
                .map_err(redis_error)
        };

        let counts = self.bounded(round_trip).await?;

        if counts.len() != counters.len() {
            return Err(StorageError::Protocol(format!(
                "expected {} counts, got {}",
                counters.len(),
                counts.len()
            )));
        }

        counts
            .into_iter()
            .map(|count| {
                u64::try_from(count).map_err(|_| StorageError::Protocol(format!("negative counter value {count}")))
            })
            .collect()
    }
}

fn pool_error(error: deadpool::managed::PoolError<RedisError>) -> StorageError {
    StorageError::Unavailable(format!("Failed to get Redis connection: {error}"))
}

/// Replies Redis did send but that make no sense as counters are protocol errors. A
/// script hitting a key of the wrong type answers with a server error, not a broken
/// connection.
fn redis_error(error: RedisError) -> StorageError {
    match error.kind() {
        ErrorKind::TypeError | ErrorKind::ResponseError | ErrorKind::ExtensionError => {
            StorageError::Protocol(error.to_string())
        }
        _ => StorageError::Unavailable(error.to_string()),
    }
}
