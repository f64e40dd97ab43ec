//! OpenTelemetry metrics for admission decisions.
//!
//! Instruments are always created against the global meter. Without an enabled OTLP
//! exporter the global provider has no reader, so recording is cheap and nothing leaves
//! the process.

mod names;
mod recorder;

pub use names::*;
pub use recorder::Recorder;

use anyhow::Context;
use config::{OtlpExporterConfig, OtlpProtocol, TelemetryConfig};
use opentelemetry::{KeyValue, metrics::Meter};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};

const METER_NAME: &str = "tollgate";

/// The meter every Tollgate instrument is created from.
pub fn meter() -> Meter {
    opentelemetry::global::meter(METER_NAME)
}

/// Builds the meter provider and installs it globally.
pub(crate) async fn init_metrics(config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    let builder = SdkMeterProvider::builder().with_resource(resource(config));

    let provider = match config.metrics_otlp_config() {
        Some(otlp) => {
            let reader = PeriodicReader::builder(exporter(otlp)?)
                .with_interval(otlp.export_interval)
                .build();

            log::info!(
                "Exporting metrics every {:?} to {} over {:?}",
                otlp.export_interval,
                otlp.endpoint,
                otlp.protocol
            );

            builder.with_reader(reader).build()
        }
        None => {
            log::debug!("No metrics exporter enabled, admission metrics stay in process");
            builder.build()
        }
    };

    opentelemetry::global::set_meter_provider(provider.clone());

    Ok(provider)
}

fn resource(config: &TelemetryConfig) -> Resource {
    let attributes = config
        .resource_attributes()
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    Resource::builder()
        .with_service_name(config.service_name().unwrap_or(METER_NAME).to_string())
        .with_attributes(attributes)
        .build()
}

fn exporter(otlp: &OtlpExporterConfig) -> anyhow::Result<MetricExporter> {
    let exporter = match otlp.protocol {
        OtlpProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(otlp.endpoint.as_str())
            .with_timeout(otlp.timeout)
            .build(),
        OtlpProtocol::Http => MetricExporter::builder()
            .with_http()
            .with_endpoint(otlp.endpoint.as_str())
            .with_timeout(otlp.timeout)
            .build(),
    };

    exporter.with_context(|| format!("Failed to create the {:?} OTLP metric exporter", otlp.protocol))
}
