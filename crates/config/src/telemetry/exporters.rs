use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Where metrics are shipped to.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OpenTelemetry collector over OTLP.
    pub otlp: OtlpExporterConfig,
}

/// OTLP metric exporter. Disabled unless `enabled = true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether metrics are exported at all.
    pub enabled: bool,
    /// Collector endpoint, `http://localhost:4317` by default.
    pub endpoint: Url,
    /// Wire protocol towards the collector.
    pub protocol: OtlpProtocol,
    /// Upper bound for one export request.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// How often accumulated metrics are pushed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub export_interval: Duration,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: local_collector(),
            protocol: OtlpProtocol::Grpc,
            timeout: Duration::from_secs(60),
            export_interval: Duration::from_secs(5),
        }
    }
}

fn local_collector() -> Url {
    Url::parse("http://localhost:4317").unwrap_or_else(|_| unreachable!("constant URL"))
}

/// OTLP transport.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC, the default.
    #[default]
    Grpc,
    /// HTTP with protobuf payloads.
    Http,
}
