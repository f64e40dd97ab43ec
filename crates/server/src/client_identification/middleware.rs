//! Client identification middleware.
//!
//! Resolves the calling client once per request and stores it as a [`ClientIdentity`]
//! extension for the rate limiter. Requests are never rejected here.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::ClientIdentificationConfig;
use http::{Request, Response};
use tower::Layer;

use crate::client_identification::{ClientIdentity, extract_client_identity};

#[derive(Clone)]
pub struct ClientIdentificationLayer(Arc<ClientIdentificationConfig>);

impl ClientIdentificationLayer {
    pub fn new(config: ClientIdentificationConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl<Service> Layer<Service> for ClientIdentificationLayer
where
    Service: Send + Clone,
{
    type Service = ClientIdentificationService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        ClientIdentificationService {
            next,
            config: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClientIdentificationService<Service> {
    next: Service,
    config: Arc<ClientIdentificationConfig>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for ClientIdentificationService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();

        match extract_client_identity(&req, &self.config) {
            Some(identity) => {
                req.extensions_mut().insert::<ClientIdentity>(identity);
            }
            None => log::debug!("Request without client identification"),
        }

        Box::pin(async move { next.call(req).await })
    }
}
