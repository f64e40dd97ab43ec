//! Rate limit manager implementation.

use config::{RateLimitConfig, UnknownClientPolicy};
use telemetry::metrics::{RATE_LIMIT_STORE_DURATION, Recorder};

use crate::{
    error::RateLimitError,
    key::{CounterKey, Scope},
    quota::Quotas,
    request::RateLimitRequest,
    storage::{CounterIncrement, CounterStorage, Storage, StorageError},
    verdict::{Denial, LimitExceeded, Verdict},
};

/// Decides whether requests fit their client's quotas.
///
/// Quotas are immutable after construction; all mutable state lives in the counter store.
pub struct RateLimitManager<S = Storage> {
    quotas: Quotas,
    unknown_clients: UnknownClientPolicy,
    storage: S,
}

impl RateLimitManager {
    /// Validates the quotas and connects the configured counter store.
    pub async fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let quotas = Quotas::from_config(config)?;
        let storage = Storage::from_config(&config.storage).await?;

        log::debug!("Rate limiting configured for {} client(s)", quotas.len());

        Ok(Self::with_storage(quotas, config.unknown_clients, storage))
    }
}

impl<S: CounterStorage> RateLimitManager<S> {
    /// A manager over an already built counter store.
    pub fn with_storage(quotas: Quotas, unknown_clients: UnknownClientPolicy, storage: S) -> Self {
        Self {
            quotas,
            unknown_clients,
            storage,
        }
    }

    /// The validated quotas.
    pub fn quotas(&self) -> &Quotas {
        &self.quotas
    }

    /// The counter store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Charges every counter matching the request and decides whether it may proceed.
    ///
    /// Counters are charged even when the request ends up denied. Scopes are checked in
    /// the order total, method, path, and horizons in declaration order; the first counter
    /// over its limit is reported. A failing store is returned as an error, never as a
    /// verdict.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<Verdict, StorageError> {
        let client = request
            .client
            .as_deref()
            .and_then(|name| self.quotas.client(name).map(|quota| (name, quota)));

        let Some((client, quota)) = client else {
            return Ok(self.unknown_client(request));
        };

        let mut candidates: Vec<(&Scope, &str, u64)> = Vec::new();
        let mut increments = Vec::new();

        for scope_quota in quota.applicable(&request.method, &request.path) {
            let scope = scope_quota.scope();

            for (horizon, limit) in scope_quota.horizons() {
                let key = CounterKey::new(client, scope, horizon).render();

                increments.push(CounterIncrement::new(key, limit.window));
                candidates.push((scope, horizon, limit.max_calls));
            }
        }

        let counts = self.increment(&increments).await?;

        let exceeded = candidates
            .into_iter()
            .zip(counts)
            .find(|((_, _, max_allowed), count)| count > max_allowed);

        let Some(((scope, horizon, max_allowed), current_count)) = exceeded else {
            return Ok(Verdict::Allowed);
        };

        log::debug!("Client '{client}' exceeded the {horizon} limit of {scope}: {current_count} > {max_allowed}");

        Ok(Verdict::Denied(Denial::LimitExceeded(LimitExceeded {
            client: client.to_string(),
            scope: scope.clone(),
            horizon: horizon.to_string(),
            current_count,
            max_allowed,
        })))
    }

    fn unknown_client(&self, request: &RateLimitRequest) -> Verdict {
        match self.unknown_clients {
            UnknownClientPolicy::Allow => Verdict::Allowed,
            UnknownClientPolicy::Deny => {
                log::debug!("Denying request from unknown client {:?}", request.client);

                Verdict::Denied(Denial::UnknownClient {
                    client: request.client.clone(),
                })
            }
        }
    }

    async fn increment(&self, increments: &[CounterIncrement]) -> Result<Vec<u64>, StorageError> {
        let mut recorder = Recorder::new(RATE_LIMIT_STORE_DURATION);

        let result = self
            .storage
            .increment_and_maybe_expire(increments)
            .await
            .and_then(|counts| {
                if counts.len() == increments.len() {
                    Ok(counts)
                } else {
                    Err(StorageError::Protocol(format!(
                        "expected {} counts, got {}",
                        increments.len(),
                        counts.len()
                    )))
                }
            });

        recorder.push_attribute("status", if result.is_ok() { "ok" } else { "error" });
        recorder.record();

        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use config::{RateLimitConfig, UnknownClientPolicy};
    use indoc::indoc;

    use super::*;
    use crate::storage::InMemoryStorage;

    const QUOTAS: &str = indoc! {r#"
        [clients.ECOM.total]
        week = [100, 604800]
        min = [50, 60]

        [clients.ECOM.methods.GET]
        min = [30, 60]

        [clients.ECOM.paths."/status"]
        min = [20, 60]

        [clients.ABC.total]
        week = [10, 604800]
        min = [5, 60]
    "#};

    fn quotas(toml: &str) -> Quotas {
        let config: RateLimitConfig = toml::from_str(toml).unwrap();
        Quotas::from_config(&config).unwrap()
    }

    fn manager(policy: UnknownClientPolicy) -> RateLimitManager<InMemoryStorage> {
        RateLimitManager::with_storage(quotas(QUOTAS), policy, InMemoryStorage::new())
    }

    fn request(client: &str, method: &str, path: &str) -> RateLimitRequest {
        RateLimitRequest::builder().client(client).method(method).path(path).build()
    }

    /// Counts calls and fails or answers as told.
    struct ScriptedStorage {
        calls: AtomicUsize,
        answer: Result<Vec<u64>, StorageError>,
    }

    impl ScriptedStorage {
        fn new(answer: Result<Vec<u64>, StorageError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
            }
        }
    }

    impl CounterStorage for ScriptedStorage {
        async fn increment_and_maybe_expire(&self, _: &[CounterIncrement]) -> Result<Vec<u64>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn path_limit_is_enforced() {
        let manager = manager(UnknownClientPolicy::Allow);
        let status = request("ECOM", "GET", "/status");

        for _ in 0..20 {
            assert_eq!(manager.check_request(&status).await.unwrap(), Verdict::Allowed);
        }

        let verdict = manager.check_request(&status).await.unwrap();

        insta::assert_debug_snapshot!(verdict, @r#"
        Denied(
            LimitExceeded(
                LimitExceeded {
                    client: "ECOM",
                    scope: Path(
                        "/status",
                    ),
                    horizon: "min",
                    current_count: 21,
                    max_allowed: 20,
                },
            ),
        )
        "#);
    }

    #[tokio::test(start_paused = true)]
    async fn client_without_total_limits_counts_only_its_method() {
        let quotas = quotas(indoc! {r#"
            [clients.ABC.methods.POST]
            min = [2, 60]
        "#});

        let manager = RateLimitManager::with_storage(quotas, UnknownClientPolicy::Deny, InMemoryStorage::new());
        let post = request("ABC", "POST", "/users");

        assert!(manager.check_request(&post).await.unwrap().is_allowed());
        assert!(manager.check_request(&post).await.unwrap().is_allowed());
        assert!(!manager.check_request(&post).await.unwrap().is_allowed());

        for _ in 0..5 {
            let get = request("ABC", "GET", "/users");
            assert!(manager.check_request(&get).await.unwrap().is_allowed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn total_limit_applies_across_methods_and_paths() {
        let manager = manager(UnknownClientPolicy::Allow);

        let requests = [
            request("ABC", "GET", "/"),
            request("ABC", "POST", "/users"),
            request("ABC", "GET", "/status"),
            request("ABC", "DELETE", "/users/1"),
            request("ABC", "GET", "/users"),
        ];

        for request in &requests {
            assert!(manager.check_request(request).await.unwrap().is_allowed());
        }

        let verdict = manager.check_request(&request("ABC", "PUT", "/users/2")).await.unwrap();

        let Verdict::Denied(Denial::LimitExceeded(exceeded)) = verdict else {
            unreachable!("expected a limit to be exceeded");
        };

        assert_eq!(exceeded.scope, Scope::Total);
        assert_eq!(exceeded.horizon, "min");
        assert_eq!(exceeded.current_count, 6);
        assert_eq!(exceeded.max_allowed, 5);
    }

    #[tokio::test]
    async fn unknown_client_is_denied_without_store_call() {
        let storage = ScriptedStorage::new(Ok(Vec::new()));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Deny, storage);

        let verdict = manager.check_request(&request("XYZ", "GET", "/status")).await.unwrap();

        assert_eq!(
            verdict,
            Verdict::Denied(Denial::UnknownClient {
                client: Some("XYZ".to_string())
            })
        );
        assert_eq!(manager.storage().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_client_is_allowed_without_store_call() {
        let storage = ScriptedStorage::new(Ok(Vec::new()));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Allow, storage);

        let verdict = manager.check_request(&request("XYZ", "GET", "/status")).await.unwrap();

        assert_eq!(verdict, Verdict::Allowed);
        assert_eq!(manager.storage().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anonymous_request_is_an_unknown_client() {
        let manager = manager(UnknownClientPolicy::Deny);
        let anonymous = RateLimitRequest::builder().method("GET").path("/").build();

        let Verdict::Denied(denial) = manager.check_request(&anonymous).await.unwrap() else {
            unreachable!("anonymous requests must be denied");
        };

        assert_eq!(denial, Denial::UnknownClient { client: None });
        assert_eq!(denial.client(), "");
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_a_verdict() {
        let storage = ScriptedStorage::new(Err(StorageError::Unavailable("connection refused".to_string())));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Allow, storage);

        let error = manager.check_request(&request("ECOM", "GET", "/status")).await.unwrap_err();

        insta::assert_snapshot!(error, @"Counter store unavailable: connection refused");
        assert_eq!(manager.storage().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_number_of_counts_is_a_protocol_error() {
        let storage = ScriptedStorage::new(Ok(vec![1]));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Allow, storage);

        // total(week, min) + GET(min) + /status(min) = 4 counters
        let error = manager.check_request(&request("ECOM", "GET", "/status")).await.unwrap_err();

        assert_eq!(error, StorageError::Protocol("expected 4 counts, got 1".to_string()));
    }

    #[tokio::test]
    async fn first_violation_in_evaluation_order_is_reported() {
        // every counter of the request is over its limit
        let storage = ScriptedStorage::new(Ok(vec![500, 500, 500, 500]));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Allow, storage);

        let verdict = manager.check_request(&request("ECOM", "GET", "/status")).await.unwrap();

        let Verdict::Denied(Denial::LimitExceeded(exceeded)) = verdict else {
            unreachable!("expected a limit to be exceeded");
        };

        assert_eq!((exceeded.scope, exceeded.horizon.as_str()), (Scope::Total, "week"));
    }

    #[tokio::test]
    async fn later_scope_reported_when_earlier_ones_fit() {
        let storage = ScriptedStorage::new(Ok(vec![1, 1, 31, 21]));
        let manager = RateLimitManager::with_storage(quotas(QUOTAS), UnknownClientPolicy::Allow, storage);

        let verdict = manager.check_request(&request("ECOM", "GET", "/status")).await.unwrap();

        let Verdict::Denied(Denial::LimitExceeded(exceeded)) = verdict else {
            unreachable!("expected a limit to be exceeded");
        };

        assert_eq!(exceeded.scope, Scope::Method("GET".to_string()));
        assert_eq!(exceeded.current_count, 31);
    }

    #[tokio::test(start_paused = true)]
    async fn scopes_are_counted_independently() {
        let manager = manager(UnknownClientPolicy::Allow);

        manager.check_request(&request("ECOM", "POST", "/status")).await.unwrap();
        manager.check_request(&request("ECOM", "GET", "/users")).await.unwrap();
        manager.check_request(&request("ECOM", "GET", "/users")).await.unwrap();

        let storage = manager.storage();

        assert_eq!(storage.count("{ECOM}|total||min").await, Some(3));
        assert_eq!(storage.count("{ECOM}|total||week").await, Some(3));
        assert_eq!(storage.count("{ECOM}|method|GET|min").await, Some(2));
        assert_eq!(storage.count("{ECOM}|path|/status|min").await, Some(1));
        assert_eq!(storage.count("{ECOM}|method|POST|min").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_requests_are_still_charged() {
        let manager = manager(UnknownClientPolicy::Allow);
        let status = request("ECOM", "GET", "/status");

        for _ in 0..22 {
            manager.check_request(&status).await.unwrap();
        }

        let storage = manager.storage();

        assert_eq!(storage.count("{ECOM}|path|/status|min").await, Some(22));
        assert_eq!(storage.count("{ECOM}|method|GET|min").await, Some(22));
        assert_eq!(storage.count("{ECOM}|total||week").await, Some(22));
    }

    #[tokio::test(start_paused = true)]
    async fn new_window_admits_again() {
        let manager = manager(UnknownClientPolicy::Allow);
        let root = request("ABC", "GET", "/");

        for _ in 0..5 {
            assert!(manager.check_request(&root).await.unwrap().is_allowed());
        }

        assert!(!manager.check_request(&root).await.unwrap().is_allowed());

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(manager.check_request(&root).await.unwrap().is_allowed());
        assert_eq!(manager.storage().count("{ABC}|total||min").await, Some(1));
        assert_eq!(manager.storage().count("{ABC}|total||week").await, Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_the_limit() {
        let manager = Arc::new(manager(UnknownClientPolicy::Allow));

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let manager = manager.clone();

                tokio::spawn(async move {
                    let status = request("ECOM", "HEAD", "/status");
                    manager.check_request(&status).await.unwrap().is_allowed()
                })
            })
            .collect();

        let mut allowed = 0;

        for task in tasks {
            if task.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 20);
    }
}
