//! Sample endpoints guarded by the rate limiter.

use axum::{Json, Router, routing::any};
use serde::Serialize;

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

async fn index() -> Json<Message> {
    Json(Message {
        message: "Welcome to Tollgate",
    })
}

async fn users() -> &'static str {
    "respond with a resource"
}

async fn status() -> Json<Message> {
    Json(Message { message: "ok" })
}

/// Endpoints answering every method, so method quotas can be exercised.
pub(crate) fn router() -> Router {
    Router::new()
        .route("/", any(index))
        .route("/users", any(users))
        .route("/users/{*rest}", any(users))
        .route("/status", any(status))
}
