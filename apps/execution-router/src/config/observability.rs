//! Metrics configuration.

use serde::{Deserialize, Serialize};

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Whether to start the Prometheus exporter.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Listen address for the metrics endpoint.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

const fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
