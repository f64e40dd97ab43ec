use std::net::SocketAddr;

use anyhow::anyhow;
use axum::{Json, Router, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    Healthy,
}

/// Liveness of the process. Never rate limited and independent of the counter store.
pub(crate) async fn health() -> (StatusCode, Json<HealthState>) {
    (StatusCode::OK, Json(HealthState::Healthy))
}

pub(crate) fn router(config: &HealthConfig) -> Router {
    Router::new().route(&config.path, get(health))
}

/// Serves the health endpoint on its own listener.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let app = router(&health_config).into_make_service();

    log::info!("Health check endpoint exposed at {scheme}://{addr}{}", health_config.path);

    match tls_config {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            axum_server::bind_rustls(addr, rustls_config)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
