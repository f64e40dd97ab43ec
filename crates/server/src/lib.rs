//! Tollgate server library.
//!
//! Provides a reusable server function to serve Tollgate either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod client_identification;
mod health;
mod rate_limit;
mod routes;

use std::{net::SocketAddr, sync::Arc};

use ::rate_limit::RateLimitManager;
use anyhow::anyhow;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use client_identification::ClientIdentificationLayer;
use config::Config;
use rate_limit::RateLimitLayer;
use tokio::net::TcpListener;

/// Configuration for serving Tollgate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Tollgate TOML configuration.
    pub config: Config,
}

/// Starts and runs the Tollgate server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let _telemetry = match &config.telemetry {
        Some(telemetry_config) => Some(telemetry::init(telemetry_config).await?),
        None => None,
    };

    let app = router(&config).await?;

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Tollgate listening on https://{listen_address}");

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            log::info!("Tollgate listening on http://{listen_address}");

            axum::serve(listener, app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
    }

    Ok(())
}

/// Builds the application: guarded endpoints first, then the unguarded health check.
async fn router(config: &Config) -> anyhow::Result<Router> {
    let rate_limits = &config.server.rate_limits;
    let mut app = routes::router();

    if rate_limits.enabled {
        log::debug!("Initializing rate limit manager with configured limits");

        let manager = RateLimitManager::new(rate_limits).await?;
        app = app.layer(RateLimitLayer::new(Arc::new(manager), rate_limits.store_failure));
    } else {
        log::debug!("Rate limiting disabled, requests are not counted");
    }

    // identification runs before the rate limiter
    app = app.layer(ClientIdentificationLayer::new(config.server.client_identification.clone()));

    let health = &config.server.health;

    if health.enabled {
        match health.listen {
            Some(listen) => {
                tokio::spawn(health::bind_health_endpoint(
                    listen,
                    config.server.tls.clone(),
                    health.clone(),
                ));
            }
            None => app = app.merge(health::router(health)),
        }
    }

    Ok(app)
}
