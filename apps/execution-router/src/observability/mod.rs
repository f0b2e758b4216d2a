//! Metrics for the execution router.

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_adapter_call, record_adapter_switch,
    record_health_status, record_migration_phase,
};
