//! Request information for rate limiting.

/// Information about a request that needs to be rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitRequest {
    /// Name of the calling client, if it could be identified.
    pub client: Option<String>,
    /// HTTP method of the request.
    pub method: String,
    /// Request path, without query string.
    pub path: String,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    client: Option<String>,
    method: String,
    path: String,
}

impl RateLimitRequestBuilder {
    /// Set the client name.
    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(name.into());
        self
    }

    /// Set the client name, if there is one.
    pub fn maybe_client(mut self, name: Option<impl Into<String>>) -> Self {
        self.client = name.map(Into::into);
        self
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the request path. Anything from the first `?` on is dropped.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let mut path = path.into();

        if let Some(query_start) = path.find('?') {
            path.truncate(query_start);
        }

        self.path = path;
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            client: self.client,
            method: self.method,
            path: self.path,
        }
    }
}
