//! Migration state machine data and its durable store.
//!
//! State is rewritten after every mutation so a crashed orchestrator
//! resumes from the last committed phase instead of restarting a
//! multi-hour migration. Writes go through a temp file and an atomic
//! rename; a partial write can never corrupt the committed state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::AdapterHealth;
use crate::routing::HealthState;

use super::MigrationError;

/// Health checks retained in migration state.
pub const HEALTH_CHECK_LIMIT: usize = 1000;

/// Phase of a migration, monotonic forward except for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Nothing has happened yet.
    NotStarted,
    /// Migration declared, no traffic moved.
    Started,
    /// New implementation at 100% on testnet.
    TestnetDeployed,
    /// Testnet soak passed the validation gate.
    TestnetValidated,
    /// Canary percentage of production traffic on the new implementation.
    ProductionCanary,
    /// Traffic forced back to the previous implementation.
    RolledBack,
    /// Rollout finished at 100%.
    Completed,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not_started",
            Self::Started => "started",
            Self::TestnetDeployed => "testnet_deployed",
            Self::TestnetValidated => "testnet_validated",
            Self::ProductionCanary => "production_canary",
            Self::RolledBack => "rolled_back",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// One health observation recorded during migration monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationCheck {
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Adapter observed.
    pub adapter: String,
    /// Classified status.
    pub status: HealthState,
    /// Raw details, if the probe succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<AdapterHealth>,
}

/// Durable state of one migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    /// Current phase.
    pub phase: MigrationPhase,
    /// When the migration was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the new implementation reached 100% on testnet.
    pub testnet_deployed_at: Option<DateTime<Utc>>,
    /// When the production canary began.
    pub production_canary_at: Option<DateTime<Utc>>,
    /// When the rollout completed.
    pub production_complete_at: Option<DateTime<Utc>>,
    /// Number of rollbacks performed over the migration's lifetime.
    pub rollback_count: u32,
    /// Recorded health checks, oldest evicted beyond the limit.
    #[serde(default)]
    pub health_checks: Vec<MigrationCheck>,
}

impl Default for MigrationState {
    fn default() -> Self {
        Self {
            phase: MigrationPhase::NotStarted,
            started_at: None,
            testnet_deployed_at: None,
            production_canary_at: None,
            production_complete_at: None,
            rollback_count: 0,
            health_checks: Vec::new(),
        }
    }
}

impl MigrationState {
    /// Append a check, evicting the oldest beyond the bound.
    pub fn push_check(&mut self, check: MigrationCheck) {
        self.health_checks.push(check);
        while self.health_checks.len() > HEALTH_CHECK_LIMIT {
            self.health_checks.remove(0);
        }
    }

    /// Healthy fraction over the most recent `sample` checks for one
    /// adapter. Returns 0.0 when no checks were recorded.
    #[must_use]
    pub fn healthy_fraction(&self, adapter: &str, sample: usize) -> f64 {
        let recent: Vec<&MigrationCheck> = self
            .health_checks
            .iter()
            .filter(|c| c.adapter == adapter)
            .rev()
            .take(sample)
            .collect();

        if recent.is_empty() {
            return 0.0;
        }
        let healthy = recent
            .iter()
            .filter(|c| !c.status.is_failing())
            .count();
        healthy as f64 / recent.len() as f64
    }
}

/// File-backed store for [`MigrationState`].
#[derive(Debug, Clone)]
pub struct MigrationStateStore {
    path: PathBuf,
}

impl MigrationStateStore {
    /// Create a store rooted at `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last committed state; a missing file yields a fresh state.
    pub fn load(&self) -> Result<MigrationState, MigrationError> {
        if !self.path.exists() {
            return Ok(MigrationState::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| MigrationError::Persistence(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| MigrationError::Persistence(e.to_string()))
    }

    /// Atomically replace the committed state.
    pub fn save(&self, state: &MigrationState) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| MigrationError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");

        std::fs::write(&tmp, json).map_err(|e| MigrationError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| MigrationError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(adapter: &str, status: HealthState) -> MigrationCheck {
        MigrationCheck {
            timestamp: Utc::now(),
            adapter: adapter.to_string(),
            status,
            details: None,
        }
    }

    #[test]
    fn test_default_state_is_not_started() {
        let state = MigrationState::default();
        assert_eq!(state.phase, MigrationPhase::NotStarted);
        assert_eq!(state.rollback_count, 0);
        assert!(state.health_checks.is_empty());
    }

    #[test]
    fn test_checks_are_bounded() {
        let mut state = MigrationState::default();
        for _ in 0..(HEALTH_CHECK_LIMIT + 50) {
            state.push_check(check("live_v2", HealthState::Healthy));
        }
        assert_eq!(state.health_checks.len(), HEALTH_CHECK_LIMIT);
    }

    #[test]
    fn test_healthy_fraction_over_recent_window() {
        let mut state = MigrationState::default();
        for _ in 0..10 {
            state.push_check(check("live_v2", HealthState::Unhealthy));
        }
        for _ in 0..90 {
            state.push_check(check("live_v2", HealthState::Healthy));
        }
        // Most recent 100 checks: 90 healthy, 10 unhealthy.
        assert!((state.healthy_fraction("live_v2", 100) - 0.9).abs() < 1e-9);

        // Degraded still counts as healthy for the gate.
        state.push_check(check("live_v2", HealthState::Degraded));
        assert!(state.healthy_fraction("live_v2", 1) > 0.99);
    }

    #[test]
    fn test_healthy_fraction_ignores_other_adapters() {
        let mut state = MigrationState::default();
        state.push_check(check("live_v1", HealthState::Unhealthy));
        state.push_check(check("live_v2", HealthState::Healthy));
        assert!((state.healthy_fraction("live_v2", 100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_history_fraction_is_zero() {
        let state = MigrationState::default();
        assert!(state.healthy_fraction("live_v2", 100).abs() < 1e-9);
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStateStore::new(dir.path().join("migration.json"));

        let mut state = MigrationState::default();
        state.phase = MigrationPhase::ProductionCanary;
        state.rollback_count = 2;
        state.push_check(check("live_v2", HealthState::Healthy));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.phase, MigrationPhase::ProductionCanary);
        assert_eq!(loaded.rollback_count, 2);
        assert_eq!(loaded.health_checks.len(), 1);
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStateStore::new(dir.path().join("missing.json"));
        let state = store.load().unwrap();
        assert_eq!(state.phase, MigrationPhase::NotStarted);
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&MigrationPhase::TestnetValidated).unwrap();
        assert_eq!(json, "\"testnet_validated\"");
    }
}
