#![allow(clippy::panic)]

use std::time::{SystemTime, UNIX_EPOCH};

use indoc::{formatdoc, indoc};
use integration_tests::TestServer;
use serde_json::Value;

/// A key prefix unique to this run, so reruns against the same Redis start from zero.
fn key_prefix(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|e| panic!("clock before epoch: {e}"))
        .as_nanos();

    format!("tollgate_test:{test}:{nanos}:")
}

fn unreachable_store(store_failure: &str) -> String {
    formatdoc! {r#"
        [server.rate_limits]
        enabled = true
        store_failure = "{store_failure}"

        [server.rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"
        connection_timeout = "200ms"
        response_timeout = "200ms"

        [server.rate_limits.clients.ECOM.total]
        min = [1, 60]
    "#}
}

#[tokio::test]
async fn unreachable_store_fails_open() {
    let server = TestServer::start(&unreachable_store("open")).await;

    for _ in 0..3 {
        let response = server.client.get_as("ECOM", "/status").await;
        assert_eq!(response.status(), 200);
        let text = response.text().await.unwrap();
        insta::allow_duplicates! {
            insta::assert_snapshot!(text, @r#"{"message":"ok"}"#);
        }
    }
}

#[tokio::test]
async fn unreachable_store_fails_closed() {
    let server = TestServer::start(&unreachable_store("closed")).await;

    let response = server.client.get_as("ECOM", "/status").await;
    assert_eq!(response.status(), 503);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "client": "ECOM",
      "message": "Rate limiter unavailable. Request not allowed."
    }
    "#);
}

#[tokio::test]
async fn unknown_clients_never_reach_the_store() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        unknown_clients = "deny"
        store_failure = "closed"

        [server.rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"
        connection_timeout = "200ms"

        [server.rate_limits.clients.ECOM.total]
        min = [1, 60]
    "#};

    let server = TestServer::start(config).await;

    // A store round trip would answer 503 under the closed policy.
    let response = server.client.get_as("XYZ", "/").await;
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn path_limit_with_redis() {
    let prefix = key_prefix("path_limit");

    let config = formatdoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [server.rate_limits.clients.ECOM.total]
        week = [100, 604800]

        [server.rate_limits.clients.ECOM.paths."/status"]
        min = [20, 60]
    "#};

    let server = TestServer::start(&config).await;

    let statuses = server.client.statuses("ECOM", "/status", 20).await;
    assert_eq!(statuses, [200; 20]);

    let response = server.client.get_as("ECOM", "/status").await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "client": "ECOM",
      "errorMsg": "ECOM path /status min limit exceeded",
      "horizon": "min",
      "maxAllowed": 20,
      "message": "Limit(s) reached! Request not allowed.",
      "reachedLimits": 21,
      "scope": "path:/status"
    }
    "#);
}

#[tokio::test]
async fn instances_share_counters_through_redis() {
    let prefix = key_prefix("shared");

    let config = formatdoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [server.rate_limits.clients.ABC.total]
        min = [5, 60]
    "#};

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let mut statuses = Vec::new();

    for round in 0..6 {
        let server = if round % 2 == 0 { &first } else { &second };
        statuses.push(server.client.get_as("ABC", "/").await.status().as_u16());
    }

    assert_eq!(statuses, [200, 200, 200, 200, 200, 429]);
}
