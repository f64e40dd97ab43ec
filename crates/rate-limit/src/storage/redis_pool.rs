//! Pool of multiplexed Redis connections.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use config::{RedisConfig, RedisTlsConfig};
use deadpool::managed::{self, Metrics};
use redis::{Client, ErrorKind, RedisError, RedisResult, aio::MultiplexedConnection};

pub(super) type Pool = managed::Pool<Manager>;

pub(super) struct Manager {
    client: Client,
    connection_timeout: Option<Duration>,
    ping_number: AtomicUsize,
}

impl Manager {
    fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = match &config.tls {
            Some(tls) => Client::build_with_tls(config.url.as_str(), tls_certificates(tls)?)?,
            None => Client::open(config.url.as_str())?,
        };

        Ok(Self {
            client,
            connection_timeout: config.connection_timeout,
            ping_number: AtomicUsize::new(0),
        })
    }
}

impl managed::Manager for Manager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, Self::Error> {
        let connect = self.client.get_multiplexed_async_connection();

        let Some(timeout) = self.connection_timeout else {
            return connect.await;
        };

        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::from((
                ErrorKind::IoError,
                "Connecting to Redis timed out",
                format!("no connection within {timeout:?}"),
            ))),
        }
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> managed::RecycleResult<Self::Error> {
        let ping_number = self.ping_number.fetch_add(1, Ordering::Relaxed).to_string();

        let pong: String = redis::cmd("PING").arg(&ping_number).query_async(conn).await?;

        if pong == ping_number {
            Ok(())
        } else {
            Err(managed::RecycleError::message("Invalid PING response"))
        }
    }
}

fn read_pem(path: &str, what: &'static str) -> RedisResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RedisError::from((ErrorKind::IoError, what, format!("{path}: {e}"))))
}

fn tls_certificates(config: &RedisTlsConfig) -> RedisResult<redis::TlsCertificates> {
    let root_cert = match &config.ca_cert_path {
        Some(path) => Some(read_pem(path, "Failed to read CA certificate")?),
        None => None,
    };

    if config.insecure {
        return Ok(redis::TlsCertificates {
            client_tls: None,
            root_cert,
        });
    }

    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some(redis::ClientTlsConfig {
            client_cert: read_pem(cert_path, "Failed to read client certificate")?,
            client_key: read_pem(key_path, "Failed to read client key")?,
        }),
        _ => None,
    };

    Ok(redis::TlsCertificates { client_tls, root_cert })
}

pub(super) fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let manager = Manager::new(config)?;

    let mut pool_config = managed::PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    pool_config.timeouts.create = config.pool.timeout_create;
    pool_config.timeouts.wait = config.pool.timeout_wait;
    pool_config.timeouts.recycle = config.pool.timeout_recycle;

    Pool::builder(manager)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((ErrorKind::IoError, "Failed to create pool", e.to_string())))
}
