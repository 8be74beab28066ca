//! Observability: logging, optional OTLP tracing, and Prometheus metrics.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use opentelemetry_otlp::WithExportConfig;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

const CHECK_DURATION_BUCKETS: &[f64] = &[
    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
];

/// Initialize the observability stack.
///
/// `RUST_LOG` takes precedence over `observability.log_level`.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
                    opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                        "service.name",
                        service_name.to_string(),
                    )]),
                ))
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json = config.json_logging;
    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().pretty()))
        .try_init()?;

    if let Some(addr) = config.metrics_addr.as_deref() {
        install_prometheus(addr)?;
    }
    metrics::register_metrics();

    tracing::info!(
        service_name,
        otlp = config.otlp_endpoint.is_some(),
        metrics_addr = config.metrics_addr.as_deref().unwrap_or("-"),
        "Observability initialized"
    );
    Ok(())
}

/// Serve Prometheus metrics on `addr`. Needs a running Tokio runtime.
fn install_prometheus(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(metrics::CHECK_DURATION.to_string()),
            CHECK_DURATION_BUCKETS,
        )?
        .install()?;
    Ok(())
}

/// Flush and stop OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metric names and descriptions.
pub mod metrics {
    use metrics::{describe_counter, describe_histogram, Unit};

    pub const DECISIONS: &str = "wordhoard_authz_decisions_total";
    pub const MUTATIONS: &str = "wordhoard_authz_mutations_total";
    pub const PERSIST_FAILURES: &str = "wordhoard_authz_persist_failures_total";
    pub const CHECK_DURATION: &str = "wordhoard_authz_check_duration_seconds";
    pub const GATEWAY_REQUESTS: &str = "wordhoard_gateway_requests_total";
    pub const ERRORS: &str = "wordhoard_errors_total";

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(DECISIONS, "Authorization decisions by outcome");
        describe_counter!(MUTATIONS, "Policy mutations by kind and whether they changed state");
        describe_counter!(
            PERSIST_FAILURES,
            "Policy changes applied in memory whose save failed"
        );
        describe_counter!(GATEWAY_REQUESTS, "Gateway verdicts by outcome");
        describe_counter!(ERRORS, "Errors by code, category and severity");
        describe_histogram!(CHECK_DURATION, Unit::Seconds, "Time spent in a single check");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_without_recorder() {
        // Descriptions are no-ops without an installed recorder.
        metrics::register_metrics();
    }

    #[test]
    fn test_invalid_metrics_addr() {
        assert!(install_prometheus("not-an-address").is_err());
    }
}
