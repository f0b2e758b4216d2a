//! Adapter selection, hot-swap and health monitoring.

mod factory;
mod health;

pub use factory::{AdapterBuilder, AdapterFactory, DEFAULT_IMPL, SwitchEvent};
pub use health::{
    AdapterHealthMonitor, FAILOVER_THRESHOLD, HEALTH_HISTORY_LIMIT, HealthRecord, HealthState,
};
