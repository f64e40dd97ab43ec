mod middleware;

pub use config::ClientIdentity;
use config::ClientIdentificationConfig;
use http::Request;
pub use middleware::ClientIdentificationLayer;

/// Extract the calling client from a request.
///
/// The configured header wins. Without it, or with an empty or non-UTF-8 value, the
/// fallback client is used if one is configured. `None` means the request is anonymous
/// and is handled like an unknown client.
pub fn extract_client_identity<B>(req: &Request<B>, config: &ClientIdentificationConfig) -> Option<ClientIdentity> {
    let from_header = req
        .headers()
        .get(config.http_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    from_header
        .or(config.fallback_client.as_deref())
        .map(ClientIdentity::new)
}
