//! Prometheus metrics for adapter routing and rollout.
//!
//! # Example
//!
//! ```ignore
//! use execution_router::observability::{MetricsConfig, init_metrics};
//!
//! let config = MetricsConfig::default();
//! init_metrics(&config).expect("Failed to initialize metrics");
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for call latency (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".parse().expect("valid default address"),
            // Latency buckets from 1ms to 10s: exchange round trips.
            latency_buckets: vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0],
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure the metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install the metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server exposing metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g. port in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );
    Ok(())
}

/// Record one adapter call with its outcome and latency.
pub fn record_adapter_call(adapter: &str, operation: &str, success: bool, latency: Duration) {
    let outcome = if success { "ok" } else { "error" };
    counter!(
        "adapter_calls_total",
        "adapter" => adapter.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        "adapter_call_latency_seconds",
        "adapter" => adapter.to_string(),
        "operation" => operation.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Record a hot-swap between adapter implementations.
pub fn record_adapter_switch(from: &str, to: &str) {
    counter!(
        "adapter_switches_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a classified health observation.
pub fn record_health_status(adapter: &str, status: &str) {
    counter!(
        "adapter_health_checks_total",
        "adapter" => adapter.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the migration phase currently active.
pub fn record_migration_phase(phase: &str) {
    gauge!(
        "migration_phase",
        "phase" => phase.to_string()
    )
    .set(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(!config.latency_buckets.is_empty());
    }

    #[test]
    fn test_recording_without_exporter_is_a_noop() {
        // The metrics facade drops records when no recorder is installed;
        // these must not panic.
        record_adapter_call("paper", "submit_order", true, Duration::from_millis(3));
        record_adapter_switch("live_v1", "live_v2");
        record_health_status("live_v2", "healthy");
        record_migration_phase("production_canary");
    }
}
