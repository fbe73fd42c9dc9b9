// packages/mesh/src/observability/mod.rs
//! Tracing, logging and metrics setup
//!
//! - **init_tracing**: `tracing-subscriber` with env filter, text or JSON
//!   output, and an optional OTLP exporter
//! - **init_metrics**: Prometheus exporter for the `metrics` counters
//!   recorded across the mesh (see [`metrics`])

pub mod metrics;

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{MeshError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `logging.level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = otlp_tracer(endpoint, &config.service_name)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| MeshError::ObservabilityError(format!("Failed to install subscriber: {}", e)))?;

    if let Some(endpoint) = &config.otlp_endpoint {
        info!("Exporting traces to OTLP collector at {}", endpoint);
    }
    Ok(())
}

fn otlp_tracer(endpoint: &str, service_name: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
            opentelemetry_sdk::Resource::new(vec![KeyValue::new(
                "service.name",
                service_name.to_string(),
            )]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| MeshError::ObservabilityError(format!("Failed to build OTLP pipeline: {}", e)))
}

/// Flush pending spans before exit
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter when metrics are enabled
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
        MeshError::ConfigError(format!("Invalid metrics listen address '{}': {}", config.listen_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MeshError::ObservabilityError(format!("Failed to install Prometheus exporter: {}", e)))?;

    metrics::describe();
    info!("Prometheus metrics available at http://{}/metrics", addr);
    Ok(())
}
