//! Admission gate for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::{ClientIdentity, StoreFailurePolicy};
use http::{Request, Response, StatusCode, header};
use rate_limit::{CounterStorage, Denial, LimitExceeded, RateLimitManager, RateLimitRequest, Scope, Storage, Verdict};
use serde::Serialize;
use telemetry::{Counter, KeyValue, metrics};
use tower::Layer;

const LIMIT_REACHED_MESSAGE: &str = "Limit(s) reached! Request not allowed.";
const UNAVAILABLE_MESSAGE: &str = "Rate limiter unavailable. Request not allowed.";

pub struct RateLimitLayer<S = Storage> {
    manager: Arc<RateLimitManager<S>>,
    store_failure: StoreFailurePolicy,
    decisions: Counter<u64>,
}

impl<S> Clone for RateLimitLayer<S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            store_failure: self.store_failure,
            decisions: self.decisions.clone(),
        }
    }
}

impl<S> RateLimitLayer<S> {
    pub fn new(manager: Arc<RateLimitManager<S>>, store_failure: StoreFailurePolicy) -> Self {
        let decisions = metrics::meter()
            .u64_counter(metrics::RATE_LIMIT_DECISIONS)
            .with_description("Admission decisions of the rate limiter")
            .build();

        Self {
            manager,
            store_failure,
            decisions,
        }
    }
}

impl<Service, S> Layer<Service> for RateLimitLayer<S>
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service, S>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            manager: self.manager.clone(),
            store_failure: self.store_failure,
            decisions: self.decisions.clone(),
        }
    }
}

pub struct RateLimitService<Service, S = Storage> {
    next: Service,
    manager: Arc<RateLimitManager<S>>,
    store_failure: StoreFailurePolicy,
    decisions: Counter<u64>,
}

impl<Service: Clone, S> Clone for RateLimitService<Service, S> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            manager: self.manager.clone(),
            store_failure: self.store_failure,
            decisions: self.decisions.clone(),
        }
    }
}

impl<Service, S, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service, S>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    S: CounterStorage + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let manager = self.manager.clone();
        let store_failure = self.store_failure;
        let decisions = self.decisions.clone();

        Box::pin(async move {
            let client = req
                .extensions()
                .get::<ClientIdentity>()
                .map(|identity| identity.client_name.clone());

            let rate_limit_request = RateLimitRequest::builder()
                .maybe_client(client)
                .method(req.method().as_str())
                .path(req.uri().path())
                .build();

            let outcome = match manager.check_request(&rate_limit_request).await {
                Ok(Verdict::Allowed) => Outcome::Allowed,
                Ok(Verdict::Denied(denial)) => Outcome::Denied(denial),
                Err(e) => match store_failure {
                    StoreFailurePolicy::Open => {
                        log::warn!("Rate limit check failed, letting the request through: {e}");
                        Outcome::FailedOpen
                    }
                    StoreFailurePolicy::Closed => {
                        log::error!("Rate limit check failed, rejecting the request: {e}");
                        Outcome::FailedClosed
                    }
                },
            };

            decisions.add(1, &[KeyValue::new("outcome", outcome.as_str())]);

            match outcome {
                Outcome::Allowed | Outcome::FailedOpen => next.call(req).await,
                Outcome::Denied(denial) => Ok(limit_reached(&denial)),
                Outcome::FailedClosed => Ok(unavailable(rate_limit_request.client.as_deref())),
            }
        })
    }
}

enum Outcome {
    Allowed,
    Denied(Denial),
    FailedOpen,
    FailedClosed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Denied(Denial::LimitExceeded(_)) => "limit_exceeded",
            Outcome::Denied(Denial::UnknownClient { .. }) => "unknown_client",
            Outcome::FailedOpen => "store_failure_open",
            Outcome::FailedClosed => "store_failure_closed",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitReachedBody<'a> {
    message: &'static str,
    client: &'a str,
    reached_limits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    horizon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_allowed: Option<u64>,
}

impl<'a> LimitReachedBody<'a> {
    fn new(denial: &'a Denial) -> Self {
        match denial {
            Denial::LimitExceeded(exceeded) => Self {
                message: LIMIT_REACHED_MESSAGE,
                client: &exceeded.client,
                reached_limits: exceeded.current_count,
                error_msg: Some(describe(exceeded)),
                scope: Some(exceeded.scope.to_string()),
                horizon: Some(&exceeded.horizon),
                max_allowed: Some(exceeded.max_allowed),
            },
            Denial::UnknownClient { .. } => Self {
                message: LIMIT_REACHED_MESSAGE,
                client: denial.client(),
                reached_limits: 0,
                error_msg: None,
                scope: None,
                horizon: None,
                max_allowed: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct UnavailableBody<'a> {
    message: &'static str,
    client: &'a str,
}

/// Human readable summary, e.g. `ECOM path /status min limit exceeded`.
fn describe(exceeded: &LimitExceeded) -> String {
    let LimitExceeded { client, horizon, .. } = exceeded;

    match &exceeded.scope {
        Scope::Total => format!("{client} total {horizon} limit exceeded"),
        Scope::Method(method) => format!("{client} method {method} {horizon} limit exceeded"),
        Scope::Path(path) => format!("{client} path {path} {horizon} limit exceeded"),
    }
}

fn limit_reached(denial: &Denial) -> Response<Body> {
    json_response(StatusCode::TOO_MANY_REQUESTS, &LimitReachedBody::new(denial))
}

fn unavailable(client: Option<&str>) -> Response<Body> {
    let body = UnavailableBody {
        message: UNAVAILABLE_MESSAGE,
        client: client.unwrap_or_default(),
    };

    json_response(StatusCode::SERVICE_UNAVAILABLE, &body)
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Body> {
    let body = match serde_json::to_vec(body) {
        Ok(body) => Body::from(body),
        Err(e) => {
            log::error!("Failed to serialize rate limit response: {e}");
            Body::empty()
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;

    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

    response
}
