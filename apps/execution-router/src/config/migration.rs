//! Migration orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::migration::MigrationSettings;

/// Migration orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Path of the persisted migration state file.
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Implementation being rolled out.
    #[serde(default = "default_new_impl")]
    pub new_impl: String,
    /// Implementation rolled back to on failure.
    #[serde(default = "default_old_impl")]
    pub old_impl: String,
    /// Canary traffic percentage.
    #[serde(default = "default_canary_percentage")]
    pub canary_percentage: u8,
    /// Traffic steps after a successful canary.
    #[serde(default = "default_rollout_steps")]
    pub rollout_steps: Vec<u8>,
    /// Seconds between health polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Consecutive unhealthy checks tolerated per window.
    #[serde(default = "default_max_unhealthy")]
    pub max_unhealthy: u32,
    /// Testnet soak length in hours.
    #[serde(default = "default_testnet_soak_hours")]
    pub testnet_soak_hours: u64,
    /// Canary soak length in hours.
    #[serde(default = "default_canary_soak_hours")]
    pub canary_soak_hours: u64,
    /// Per-step soak length in hours.
    #[serde(default = "default_step_soak_hours")]
    pub step_soak_hours: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            new_impl: default_new_impl(),
            old_impl: default_old_impl(),
            canary_percentage: default_canary_percentage(),
            rollout_steps: default_rollout_steps(),
            poll_interval_secs: default_poll_interval_secs(),
            max_unhealthy: default_max_unhealthy(),
            testnet_soak_hours: default_testnet_soak_hours(),
            canary_soak_hours: default_canary_soak_hours(),
            step_soak_hours: default_step_soak_hours(),
        }
    }
}

impl MigrationConfig {
    /// Convert to the runtime settings.
    #[must_use]
    pub fn to_settings(&self) -> MigrationSettings {
        MigrationSettings {
            new_impl: self.new_impl.clone(),
            old_impl: self.old_impl.clone(),
            canary_percentage: self.canary_percentage.min(100),
            rollout_steps: self.rollout_steps.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_unhealthy: self.max_unhealthy,
            testnet_soak: Duration::from_secs(self.testnet_soak_hours * 3600),
            canary_soak: Duration::from_secs(self.canary_soak_hours * 3600),
            step_soak: Duration::from_secs(self.step_soak_hours * 3600),
        }
    }
}

fn default_state_path() -> String {
    "migration_state.json".to_string()
}
fn default_new_impl() -> String {
    "live_v2".to_string()
}
fn default_old_impl() -> String {
    "live_v1".to_string()
}
const fn default_canary_percentage() -> u8 {
    10
}
fn default_rollout_steps() -> Vec<u8> {
    vec![25, 50, 75, 100]
}
const fn default_poll_interval_secs() -> u64 {
    60
}
const fn default_max_unhealthy() -> u32 {
    5
}
const fn default_testnet_soak_hours() -> u64 {
    24
}
const fn default_canary_soak_hours() -> u64 {
    6
}
const fn default_step_soak_hours() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_rollout_plan() {
        let config = MigrationConfig::default();
        let settings = config.to_settings();

        assert_eq!(settings.canary_percentage, 10);
        assert_eq!(settings.rollout_steps, vec![25, 50, 75, 100]);
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.max_unhealthy, 5);
        assert_eq!(settings.canary_soak, Duration::from_secs(6 * 3600));
        assert_eq!(settings.step_soak, Duration::from_secs(2 * 3600));
    }
}
