//! Rate limiting configuration structures.

use std::{collections::BTreeMap, fmt, time::Duration};

use duration_str::deserialize_option_duration;
use serde::{
    Deserialize, Deserializer,
    de::{Error as _, MapAccess, Visitor},
};

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// What to do with requests from clients that have no quota configured.
    #[serde(default)]
    pub unknown_clients: UnknownClientPolicy,
    /// What to do with requests when the counter store cannot be reached.
    #[serde(default)]
    pub store_failure: StoreFailurePolicy,
    /// Quotas keyed by client name.
    #[serde(default)]
    pub clients: BTreeMap<String, ClientQuotaConfig>,
}

/// Policy for requests whose client has no configured quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownClientPolicy {
    /// Let the request through without counting it.
    #[default]
    Allow,
    /// Reject the request without touching the counter store.
    Deny,
}

/// Policy for requests when the counter store fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFailurePolicy {
    /// Let the request through (fail-open).
    #[default]
    Open,
    /// Reject the request with a "limiter unavailable" response (fail-closed).
    Closed,
}

/// Quota configuration of a single client.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientQuotaConfig {
    /// Limits applied to every request of the client. May be empty when only
    /// method or path limits are wanted.
    #[serde(default)]
    pub total: HorizonSetConfig,
    /// Limits applied per HTTP method, keyed by method name.
    #[serde(default)]
    pub methods: BTreeMap<String, HorizonSetConfig>,
    /// Limits applied per exact request path.
    #[serde(default)]
    pub paths: BTreeMap<String, HorizonSetConfig>,
}

/// Horizon limits of one scope, in the order they were declared.
#[derive(Clone, Default, PartialEq)]
pub struct HorizonSetConfig {
    horizons: Vec<(String, HorizonLimitConfig)>,
}

impl HorizonSetConfig {
    /// Iterate over `(horizon name, limit)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HorizonLimitConfig)> {
        self.horizons.iter().map(|(name, limit)| (name.as_str(), limit))
    }

    /// Number of horizons declared in this set.
    pub fn len(&self) -> usize {
        self.horizons.len()
    }

    /// Whether the set declares no horizon at all.
    pub fn is_empty(&self) -> bool {
        self.horizons.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, HorizonLimitConfig)> for HorizonSetConfig {
    fn from_iter<T: IntoIterator<Item = (S, HorizonLimitConfig)>>(iter: T) -> Self {
        Self {
            horizons: iter.into_iter().map(|(name, limit)| (name.into(), limit)).collect(),
        }
    }
}

impl fmt::Debug for HorizonSetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'de> Deserialize<'de> for HorizonSetConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HorizonSetVisitor;

        impl<'de> Visitor<'de> for HorizonSetVisitor {
            type Value = HorizonSetConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a table of horizon names to limits")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut horizons = Vec::with_capacity(map.size_hint().unwrap_or(4));

                while let Some((name, limit)) = map.next_entry::<String, HorizonLimitConfig>()? {
                    horizons.push((name, limit));
                }

                Ok(HorizonSetConfig { horizons })
            }
        }

        deserializer.deserialize_map(HorizonSetVisitor)
    }
}

/// Limit for one horizon: maximum calls within a fixed window.
///
/// Accepts either `[max_calls, window_seconds]` or `{ limit = 20, window = "60s" }`.
/// The window may be left out for built-in horizon names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "HorizonLimitRepr")]
pub struct HorizonLimitConfig {
    /// Maximum number of calls allowed within one window.
    pub limit: u64,
    /// Length of the window.
    pub window: Option<Duration>,
}

impl HorizonLimitConfig {
    /// A limit with an explicit window.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window: Some(window),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HorizonLimitRepr {
    Pair(u64, u64),
    Table {
        limit: u64,
        #[serde(default, deserialize_with = "deserialize_option_duration")]
        window: Option<Duration>,
    },
}

impl From<HorizonLimitRepr> for HorizonLimitConfig {
    fn from(repr: HorizonLimitRepr) -> Self {
        match repr {
            HorizonLimitRepr::Pair(limit, seconds) => Self::new(limit, Duration::from_secs(seconds)),
            HorizonLimitRepr::Table { limit, window } => Self { limit, window },
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default). Only correct for a single instance.
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all counter keys. Must not contain `{` or `}`, the counter keys
    /// carry the client as Redis Cluster hash tag.
    #[serde(default = "default_key_prefix", deserialize_with = "deserialize_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for one counter batch round trip.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// Upper bound for establishing a new connection.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub connection_timeout: Option<Duration>,
}

fn default_key_prefix() -> String {
    "tollgate:rate_limit:".to_string()
}

fn deserialize_key_prefix<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let prefix = String::deserialize(deserializer)?;

    if prefix.contains(['{', '}']) {
        return Err(D::Error::custom(format!(
            "key_prefix must not contain '{{' or '}}', got '{prefix}'"
        )));
    }

    Ok(prefix)
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Skip loading a client certificate and trust only the given CA, if any.
    pub insecure: bool,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
