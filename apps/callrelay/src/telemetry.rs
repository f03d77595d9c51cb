// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! OpenTelemetry setup: a global meter provider for the call counters in [`crate::metrics`]
//! and an optional OTLP span exporter for the tracing layer.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    trace::{self as sdktrace, SdkTracerProvider},
    Resource,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;

use crate::config::TelemetryConfig;

const SERVICE_NAME: &str = "callrelay";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

fn service_resource() -> Resource {
    Resource::builder_empty()
        .with_attributes([
            opentelemetry::KeyValue::new("service.name", SERVICE_NAME),
            opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build()
}

/// Headers are logged by count only; they usually carry collector credentials.
fn export_headers(headers: &HashMap<String, String>, signal: &str) -> Option<HashMap<String, String>> {
    if headers.is_empty() {
        return None;
    }
    tracing::info!(signal, count = headers.len(), "Adding custom headers to OTLP exporter");
    Some(headers.clone())
}

fn build_metric_exporter(
    endpoint: &str,
    headers: &HashMap<String, String>,
) -> Result<opentelemetry_otlp::MetricExporter, Box<dyn std::error::Error>> {
    let mut builder = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT);
    if let Some(headers) = export_headers(headers, "metrics") {
        builder = builder.with_headers(headers);
    }

    builder.build().map_err(|e| {
        tracing::error!(error = %e, "Failed to build OTLP metrics exporter");
        e.into()
    })
}

fn build_span_exporter(
    endpoint: &str,
    headers: &HashMap<String, String>,
) -> Result<opentelemetry_otlp::SpanExporter, Box<dyn std::error::Error>> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT);
    if let Some(headers) = export_headers(headers, "traces") {
        builder = builder.with_headers(headers);
    }

    builder.build().map_err(|e| {
        tracing::error!(error = %e, "Failed to build OTLP trace exporter");
        e.into()
    })
}

/// Initializes the global meter provider, exporting over OTLP when `otlp_endpoint` is set and
/// collecting locally otherwise.
///
/// The instruments in [`crate::metrics`] are created lazily from the global meter, so this
/// must run before the first call is ingested for them to be exported.
///
/// # Errors
///
/// Returns an error if the OTLP metrics exporter fails to build (e.g. an invalid endpoint).
pub fn init_metrics(
    config: &TelemetryConfig,
) -> Result<SdkMeterProvider, Box<dyn std::error::Error>> {
    let builder = SdkMeterProvider::builder().with_resource(service_resource());

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "Configuring OTLP metrics exporter");
            let exporter = build_metric_exporter(endpoint, &config.otlp_headers)?;
            let reader = PeriodicReader::builder(exporter).with_interval(METRICS_INTERVAL).build();
            builder.with_reader(reader).build()
        },
        None => {
            tracing::info!("No OTLP endpoint configured, metrics will be collected but not exported");
            builder.build()
        },
    };

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Initializes an OpenTelemetry tracing layer that exports spans via OTLP.
///
/// # Errors
///
/// Returns an error if `otlp_traces_endpoint` is missing or the exporter cannot be built.
pub fn init_tracing_with_otlp<S>(
    config: &TelemetryConfig,
) -> Result<OpenTelemetryLayer<S, sdktrace::Tracer>, Box<dyn std::error::Error>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let endpoint = config.otlp_traces_endpoint.as_ref().ok_or_else(|| {
        "Tracing is enabled but no `otlp_traces_endpoint` is configured".to_string()
    })?;

    tracing::info!(%endpoint, "Configuring OTLP trace exporter");
    let exporter = build_span_exporter(endpoint, &config.otlp_headers)?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(service_resource())
        .build();

    let tracer = provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}
