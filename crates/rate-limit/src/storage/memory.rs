//! In-memory counter storage for single-instance deployments.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use super::{CounterIncrement, CounterStorage, StorageError};

/// How often expired counters are dropped from the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed-window counters kept in this process.
///
/// One lock guards the whole map, so every batch is applied atomically. Expiry follows
/// the tokio clock.
pub struct InMemoryStorage {
    state: Mutex<State>,
}

struct State {
    counters: HashMap<String, Counter>,
    last_sweep: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    const FRESH: Counter = Counter {
        value: 0,
        expires_at: None,
    };

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl InMemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                counters: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Time left until the counter expires, or `None` if it does not exist.
    pub async fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock().await;

        let counter = state.counters.get(key).filter(|counter| !counter.is_expired(now))?;
        counter.expires_at.map(|expires_at| expires_at - now)
    }

    /// Current value of the counter, or `None` if it does not exist.
    pub async fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let state = self.state.lock().await;

        state
            .counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.value)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStorage for InMemoryStorage {
    async fn increment_and_maybe_expire(&self, counters: &[CounterIncrement]) -> Result<Vec<u64>, StorageError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if now.duration_since(state.last_sweep) >= SWEEP_INTERVAL {
            state.counters.retain(|_, counter| !counter.is_expired(now));
            state.last_sweep = now;
        }

        let counts = counters
            .iter()
            .map(|increment| {
                let counter = state.counters.entry(increment.key.clone()).or_insert(Counter::FRESH);

                if counter.is_expired(now) {
                    *counter = Counter::FRESH;
                }

                counter.value += 1;

                if counter.expires_at.is_none() {
                    counter.expires_at = Some(now + increment.window);
                }

                counter.value
            })
            .collect();

        Ok(counts)
    }
}
