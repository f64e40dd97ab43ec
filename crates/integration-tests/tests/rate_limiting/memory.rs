use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::Value;

const ECOM_AND_ABC: &str = indoc! {r#"
    [server.rate_limits]
    enabled = true

    [server.rate_limits.clients.ECOM.total]
    week = [100, 604800]

    [server.rate_limits.clients.ECOM.paths."/status"]
    min = [20, 60]

    [server.rate_limits.clients.ABC.total]
    week = [10, 604800]
    min = [5, 60]

    [server.rate_limits.clients.ABC.methods.POST]
    week = [20, 604800]
"#};

#[tokio::test]
async fn path_limit_denies_the_twenty_first_request() {
    let server = TestServer::start(ECOM_AND_ABC).await;

    let statuses = server.client.statuses("ECOM", "/status", 20).await;
    assert!(statuses.iter().all(|status| *status == 200), "{statuses:?}");

    let response = server.client.get_as("ECOM", "/status").await;
    assert_eq!(response.status(), 429);

    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert_eq!(content_type, "application/json");

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
async fn path_limit_leaves_other_paths_open() {
    let server = TestServer::start(ECOM_AND_ABC).await;

    server.client.statuses("ECOM", "/status", 21).await;

    let response = server.client.get_as("ECOM", "/users").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "respond with a resource");
}

#[tokio::test]
async fn total_limit_spans_methods_and_paths() {
    let server = TestServer::start(ECOM_AND_ABC).await;
    let client = &server.client;

    let requests = [
        (Method::GET, "/"),
        (Method::POST, "/users"),
        (Method::PUT, "/users/42"),
        (Method::DELETE, "/status"),
        (Method::GET, "/users"),
    ];

    for (method, path) in requests {
        let response = client.request(method, path, Some("ABC")).await;
        assert_eq!(response.status(), 200);
    }

    let response = client.request(Method::PATCH, "/users/7", Some("ABC")).await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "client": "ABC",
      "errorMsg": "ABC total min limit exceeded",
      "horizon": "min",
      "maxAllowed": 5,
      "message": "Limit(s) reached! Request not allowed.",
      "reachedLimits": 6,
      "scope": "total"
    }
    "#);
}

#[tokio::test]
async fn clients_are_counted_separately() {
    let server = TestServer::start(ECOM_AND_ABC).await;

    let statuses = server.client.statuses("ABC", "/", 6).await;
    assert_eq!(statuses, [200, 200, 200, 200, 200, 429]);

    let statuses = server.client.statuses("ECOM", "/", 6).await;
    assert_eq!(statuses, [200; 6]);
}

#[tokio::test]
async fn unknown_client_denied_by_policy() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        unknown_clients = "deny"

        [server.rate_limits.clients.ABC.total]
        min = [5, 60]
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.get_as("XYZ", "/users").await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "client": "XYZ",
      "message": "Limit(s) reached! Request not allowed.",
      "reachedLimits": 0
    }
    "#);
}

#[tokio::test]
async fn anonymous_request_denied_by_policy() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        unknown_clients = "deny"

        [server.rate_limits.clients.ABC.total]
        min = [5, 60]
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.get("/").await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "client": "",
      "message": "Limit(s) reached! Request not allowed.",
      "reachedLimits": 0
    }
    "#);
}

#[tokio::test]
async fn unknown_client_allowed_without_limits() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        unknown_clients = "allow"

        [server.rate_limits.clients.ABC.total]
        min = [1, 60]
    "#};

    let server = TestServer::start(config).await;

    let statuses = server.client.statuses("XYZ", "/status", 5).await;
    assert_eq!(statuses, [200; 5]);

    let response = server.client.get("/status").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn method_limit_only_counts_that_method() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.clients.ABC.methods.POST]
        min = [2, 60]
    "#};

    let server = TestServer::start(config).await;
    let client = &server.client;

    for _ in 0..2 {
        let response = client.request(Method::POST, "/users", Some("ABC")).await;
        assert_eq!(response.status(), 200);
    }

    let response = client.request(Method::POST, "/users", Some("ABC")).await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["scope"], "method:POST");
    assert_eq!(body["errorMsg"], "ABC method POST min limit exceeded");

    let statuses = client.statuses("ABC", "/users", 3).await;
    assert_eq!(statuses, [200; 3]);
}

#[tokio::test]
async fn query_string_does_not_split_path_counters() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.clients.ECOM.paths."/status"]
        min = [2, 60]
    "#};

    let server = TestServer::start(config).await;

    let statuses = [
        server.client.get_as("ECOM", "/status?verbose=1").await.status().as_u16(),
        server.client.get_as("ECOM", "/status").await.status().as_u16(),
        server.client.get_as("ECOM", "/status?page=2").await.status().as_u16(),
    ];

    assert_eq!(statuses, [200, 200, 429]);
}

#[tokio::test]
async fn fallback_client_is_charged_for_anonymous_requests() {
    let config = indoc! {r#"
        [server.client_identification]
        fallback_client = "ABC"

        [server.rate_limits]
        enabled = true

        [server.rate_limits.clients.ABC.total]
        min = [2, 60]
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/").await.status(), 200);
    assert_eq!(server.client.get_as("ABC", "/").await.status(), 200);

    let response = server.client.get("/").await;
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["client"], "ABC");
}

#[tokio::test]
async fn custom_identification_header() {
    let config = indoc! {r#"
        [server.client_identification]
        http_header = "clientName"

        [server.rate_limits]
        enabled = true

        [server.rate_limits.clients.ABC.total]
        min = [1, 60]
    "#};

    let server = TestServer::start(config).await;

    let statuses = server.client.statuses("ABC", "/", 2).await;
    assert_eq!(statuses, [200, 429]);
}

#[tokio::test]
async fn health_is_never_limited() {
    let server = TestServer::start(ECOM_AND_ABC).await;

    server.client.statuses("ABC", "/", 6).await;

    for _ in 0..10 {
        let response = server.client.get_as("ABC", "/health").await;
        assert_eq!(response.status(), 200);
        let text = response.text().await.unwrap();
        insta::allow_duplicates! {
            insta::assert_snapshot!(text, @r#"{"status":"healthy"}"#);
        }
    }
}

#[tokio::test]
async fn disabled_rate_limiting_admits_everything() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = false

        [server.rate_limits.clients.ABC.total]
        min = [1, 60]
    "#};

    let server = TestServer::start(config).await;

    let statuses = server.client.statuses("ABC", "/", 5).await;
    assert_eq!(statuses, [200; 5]);
}

#[tokio::test]
async fn concurrent_requests_never_overshoot() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.clients.ABC.total]
        min = [10, 60]
    "#};

    let server = TestServer::start(config).await;

    let responses = concurrent_statuses(&server, 40).await;
    let allowed = responses.iter().filter(|status| **status == 200).count();
    let denied = responses.iter().filter(|status| **status == 429).count();

    assert_eq!((allowed, denied), (10, 30));
}

async fn concurrent_statuses(server: &TestServer, count: usize) -> Vec<u16> {
    let mut set = tokio::task::JoinSet::new();
    let client = std::sync::Arc::new(reqwest::Client::new());
    let url = format!("http://{}/", server.address);

    for _ in 0..count {
        let client = client.clone();
        let url = url.clone();

        set.spawn(async move {
            let response = client.get(url).header("X-Client-Name", "ABC").send().await.unwrap();
            response.status().as_u16()
        });
    }

    set.join_all().await
}
