//! Migration orchestrator driving the phased rollout state machine.
//!
//! One orchestrator instance exists per target environment. Every phase
//! transition and every recorded health check is persisted immediately, so
//! a crashed process resumes mid-migration instead of starting over. A
//! failed health gate never lets the rollout proceed — it triggers an
//! automatic rollback to the previous implementation.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::flags::{EXECUTION_IMPL_FLAG, Environment, FeatureFlagManager, FlagValue};
use crate::observability;
use crate::routing::{AdapterFactory, AdapterHealthMonitor, HealthState};

use super::state::{MigrationCheck, MigrationPhase, MigrationState, MigrationStateStore};
use super::MigrationError;

/// Checks sampled by the testnet validation gate.
const VALIDATION_SAMPLE: usize = 100;

/// Healthy fraction the testnet validation gate requires.
const VALIDATION_THRESHOLD: f64 = 0.95;

/// Tunables for one migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Implementation being rolled out.
    pub new_impl: String,
    /// Implementation rolled back to on failure.
    pub old_impl: String,
    /// Canary traffic percentage.
    pub canary_percentage: u8,
    /// Traffic steps after a successful canary.
    pub rollout_steps: Vec<u8>,
    /// Interval between health polls.
    pub poll_interval: Duration,
    /// Consecutive unhealthy checks tolerated before a window fails.
    pub max_unhealthy: u32,
    /// Monitoring window after testnet deployment.
    pub testnet_soak: Duration,
    /// Monitoring window for the production canary.
    pub canary_soak: Duration,
    /// Monitoring window for each rollout step.
    pub step_soak: Duration,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            new_impl: "live_v2".to_string(),
            old_impl: "live_v1".to_string(),
            canary_percentage: 10,
            rollout_steps: vec![25, 50, 75, 100],
            poll_interval: Duration::from_secs(60),
            max_unhealthy: 5,
            testnet_soak: Duration::from_secs(24 * 3600),
            canary_soak: Duration::from_secs(6 * 3600),
            step_soak: Duration::from_secs(2 * 3600),
        }
    }
}

/// Orchestrator owning the migration state machine.
///
/// Sole writer of [`MigrationState`]; everything else only reads snapshots.
pub struct MigrationOrchestrator {
    settings: MigrationSettings,
    flags: Arc<FeatureFlagManager>,
    factory: Arc<AdapterFactory>,
    monitor: Arc<AdapterHealthMonitor>,
    store: MigrationStateStore,
    state: Mutex<MigrationState>,
    cancel: CancellationToken,
}

impl MigrationOrchestrator {
    /// Create an orchestrator, resuming from persisted state if present.
    pub fn new(
        flags: Arc<FeatureFlagManager>,
        factory: Arc<AdapterFactory>,
        monitor: Arc<AdapterHealthMonitor>,
        store: MigrationStateStore,
        settings: MigrationSettings,
    ) -> Result<Self, MigrationError> {
        let state = store.load()?;
        if state.phase != MigrationPhase::NotStarted {
            tracing::info!(
                phase = %state.phase,
                rollbacks = state.rollback_count,
                "Resuming migration from persisted state"
            );
        }
        Ok(Self {
            settings,
            flags,
            factory,
            monitor,
            store,
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
        })
    }

    /// Environment this orchestrator operates in.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.flags.environment()
    }

    /// Snapshot of the current migration state.
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.lock().clone()
    }

    /// Token that cancels in-flight monitoring loops cooperatively.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Declare the migration. `not_started → started`.
    pub fn start_migration(&self) -> Result<(), MigrationError> {
        {
            let mut state = self.lock();
            if state.phase != MigrationPhase::NotStarted {
                return Err(MigrationError::WrongPhase {
                    expected: MigrationPhase::NotStarted,
                    actual: state.phase,
                });
            }
            state.phase = MigrationPhase::Started;
            state.started_at = Some(Utc::now());
        }
        self.persist()?;

        tracing::info!(
            environment = %self.environment(),
            new_impl = %self.settings.new_impl,
            "Migration started"
        );
        observability::record_migration_phase("started");
        Ok(())
    }

    /// Put the new implementation at 100% on testnet and soak it.
    ///
    /// Verifies the factory actually serves the expected implementation
    /// before monitoring. Returns the soak outcome; the explicit
    /// [`Self::validate_testnet`] gate still has to pass afterwards.
    pub async fn deploy_testnet(&self) -> Result<bool, MigrationError> {
        {
            let state = self.lock();
            if state.phase != MigrationPhase::Started {
                return Err(MigrationError::WrongPhase {
                    expected: MigrationPhase::Started,
                    actual: state.phase,
                });
            }
        }

        self.flags
            .set(EXECUTION_IMPL_FLAG, FlagValue::from(self.settings.new_impl.clone()));
        self.flags.enable(EXECUTION_IMPL_FLAG, 100);

        let adapter = self.factory.get_adapter(None).await?;
        if adapter.adapter_name() != self.settings.new_impl {
            return Err(MigrationError::Validation(format!(
                "factory serves '{}' but migration expects '{}'",
                adapter.adapter_name(),
                self.settings.new_impl
            )));
        }

        {
            let mut state = self.lock();
            state.phase = MigrationPhase::TestnetDeployed;
            state.testnet_deployed_at = Some(Utc::now());
        }
        self.persist()?;

        tracing::info!(
            new_impl = %self.settings.new_impl,
            soak_secs = self.settings.testnet_soak.as_secs(),
            "Testnet deployment live, monitoring"
        );
        observability::record_migration_phase("testnet_deployed");

        Ok(self.monitor_health(self.settings.testnet_soak).await)
    }

    /// Poll adapter health for `duration`.
    ///
    /// Tolerates up to `max_unhealthy` *consecutive* unhealthy checks — a
    /// healthy check resets the streak. Every check is appended to the
    /// persisted state so an interrupted soak resumes with its history.
    /// Returns true only when the full window elapses without exceeding the
    /// streak limit. Cancellation finishes the in-flight check and its
    /// state write before exiting (reported as failure).
    pub async fn monitor_health(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut unhealthy_streak: u32 = 0;
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checks = self.monitor.check_health().await;
                    let record = checks.get(self.settings.new_impl.as_str());
                    let (status, details) = record.map_or(
                        (HealthState::Error, None),
                        |r| (r.status, r.details.clone()),
                    );

                    if status.is_failing() {
                        unhealthy_streak += 1;
                        tracing::warn!(
                            adapter = %self.settings.new_impl,
                            status = %status,
                            streak = unhealthy_streak,
                            tolerated = self.settings.max_unhealthy,
                            "Unhealthy check during migration monitoring"
                        );
                    } else {
                        unhealthy_streak = 0;
                    }

                    {
                        let mut state = self.lock();
                        state.push_check(MigrationCheck {
                            timestamp: Utc::now(),
                            adapter: self.settings.new_impl.clone(),
                            status,
                            details,
                        });
                    }
                    // In-memory state stays authoritative on a failed save.
                    let _ = self.persist();

                    if unhealthy_streak > self.settings.max_unhealthy {
                        tracing::error!(
                            adapter = %self.settings.new_impl,
                            streak = unhealthy_streak,
                            "Unhealthy streak exceeded tolerance"
                        );
                        return false;
                    }
                    if Instant::now() >= deadline {
                        tracing::info!(
                            adapter = %self.settings.new_impl,
                            "Monitoring window completed healthy"
                        );
                        return true;
                    }
                }
                () = self.cancel.cancelled() => {
                    tracing::info!(
                        "Migration monitoring cancelled; last check already persisted"
                    );
                    return false;
                }
            }
        }
    }

    /// Testnet validation gate, called explicitly by a human or CI step.
    ///
    /// Requires the most recent 100 recorded checks to be at least 95%
    /// healthy. On success the phase advances to `testnet_validated`; on
    /// failure the phase is unchanged and the observed ratio is reported.
    pub fn validate_testnet(&self) -> Result<f64, MigrationError> {
        let fraction = {
            let mut state = self.lock();
            if state.phase != MigrationPhase::TestnetDeployed {
                return Err(MigrationError::WrongPhase {
                    expected: MigrationPhase::TestnetDeployed,
                    actual: state.phase,
                });
            }
            let fraction = state.healthy_fraction(&self.settings.new_impl, VALIDATION_SAMPLE);
            if fraction >= VALIDATION_THRESHOLD {
                state.phase = MigrationPhase::TestnetValidated;
            }
            fraction
        };

        if fraction >= VALIDATION_THRESHOLD {
            self.persist()?;
            tracing::info!(
                healthy_pct = fraction * 100.0,
                "Testnet validated"
            );
            observability::record_migration_phase("testnet_validated");
            Ok(fraction)
        } else {
            tracing::warn!(
                healthy_pct = fraction * 100.0,
                required_pct = VALIDATION_THRESHOLD * 100.0,
                "Testnet validation failed"
            );
            Err(MigrationError::Validation(format!(
                "testnet healthy fraction {:.1}% below required {:.0}%",
                fraction * 100.0,
                VALIDATION_THRESHOLD * 100.0
            )))
        }
    }

    /// Run the production rollout: canary, then stepped traffic increases.
    ///
    /// Any failed monitoring window triggers an automatic rollback and
    /// halts forward progress.
    pub async fn run_production_rollout(&self) -> Result<(), MigrationError> {
        {
            let state = self.lock();
            if state.phase != MigrationPhase::TestnetValidated {
                return Err(MigrationError::WrongPhase {
                    expected: MigrationPhase::TestnetValidated,
                    actual: state.phase,
                });
            }
        }

        self.flags
            .set(EXECUTION_IMPL_FLAG, FlagValue::from(self.settings.new_impl.clone()));
        self.flags
            .enable(EXECUTION_IMPL_FLAG, self.settings.canary_percentage);

        {
            let mut state = self.lock();
            state.phase = MigrationPhase::ProductionCanary;
            state.production_canary_at = Some(Utc::now());
        }
        self.persist()?;

        tracing::info!(
            new_impl = %self.settings.new_impl,
            traffic_pct = self.settings.canary_percentage,
            soak_secs = self.settings.canary_soak.as_secs(),
            "Production canary live"
        );
        observability::record_migration_phase("production_canary");

        if !self.monitor_health(self.settings.canary_soak).await {
            self.rollback()?;
            return Err(MigrationError::Validation(
                "canary health gate failed".to_string(),
            ));
        }

        for step in self.settings.rollout_steps.clone() {
            self.flags.enable(EXECUTION_IMPL_FLAG, step);
            tracing::info!(traffic_pct = step, "Rollout step live");

            if !self.monitor_health(self.settings.step_soak).await {
                self.rollback()?;
                return Err(MigrationError::Validation(format!(
                    "rollout halted at {step}% traffic"
                )));
            }
        }

        {
            let mut state = self.lock();
            state.phase = MigrationPhase::Completed;
            state.production_complete_at = Some(Utc::now());
        }
        self.persist()?;

        tracing::info!(new_impl = %self.settings.new_impl, "Migration completed");
        observability::record_migration_phase("completed");
        Ok(())
    }

    /// Force traffic back to the previous implementation.
    ///
    /// Available from any phase as the abort hatch; each call increments
    /// the rollback count by exactly one.
    pub fn rollback(&self) -> Result<(), MigrationError> {
        self.flags
            .set(EXECUTION_IMPL_FLAG, FlagValue::from(self.settings.old_impl.clone()));
        self.flags.enable(EXECUTION_IMPL_FLAG, 100);

        {
            let mut state = self.lock();
            state.phase = MigrationPhase::RolledBack;
            state.rollback_count += 1;
        }

        tracing::warn!(
            old_impl = %self.settings.old_impl,
            rollbacks = self.lock().rollback_count,
            "Migration rolled back"
        );
        observability::record_migration_phase("rolled_back");
        self.persist()
    }

    /// Persist the current state; logs and surfaces failures without
    /// rolling back in-memory state.
    fn persist(&self) -> Result<(), MigrationError> {
        let snapshot = self.lock().clone();
        self.store.save(&snapshot).inspect_err(|error| {
            tracing::error!(%error, "Failed to persist migration state; in-memory state kept");
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MigrationState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::flags::FlagStore;

    struct Harness {
        flags: Arc<FeatureFlagManager>,
        factory: Arc<AdapterFactory>,
        monitor: Arc<AdapterHealthMonitor>,
        new_adapter: Arc<MockAdapter>,
        _dir: tempfile::TempDir,
    }

    fn fast_settings() -> MigrationSettings {
        MigrationSettings {
            new_impl: "mock_new".to_string(),
            old_impl: "mock_old".to_string(),
            canary_percentage: 10,
            rollout_steps: vec![25, 50, 75, 100],
            poll_interval: Duration::from_millis(10),
            max_unhealthy: 5,
            testnet_soak: Duration::from_millis(100),
            canary_soak: Duration::from_millis(100),
            step_soak: Duration::from_millis(50),
        }
    }

    fn make_harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = FlagStore::new(dir.path().join("flags.json"));
        let flags = Arc::new(FeatureFlagManager::new(Environment::Testnet, store));
        let monitor = Arc::new(AdapterHealthMonitor::new());

        let new_adapter = Arc::new(MockAdapter::new("mock_new"));
        let old_adapter = Arc::new(MockAdapter::new("mock_old"));

        let mut factory = AdapterFactory::new(Arc::clone(&flags), Arc::clone(&monitor));
        let new_clone = Arc::clone(&new_adapter);
        factory.register_builder("mock_new", move || Ok(new_clone.clone()));
        let old_clone = Arc::clone(&old_adapter);
        factory.register_builder("mock_old", move || Ok(old_clone.clone()));

        Harness {
            flags,
            factory: Arc::new(factory),
            monitor,
            new_adapter,
            _dir: dir,
        }
    }

    fn make_orchestrator(harness: &Harness) -> MigrationOrchestrator {
        let store = MigrationStateStore::new(harness._dir.path().join("migration.json"));
        MigrationOrchestrator::new(
            Arc::clone(&harness.flags),
            Arc::clone(&harness.factory),
            Arc::clone(&harness.monitor),
            store,
            fast_settings(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_migration_transitions_once() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);

        orchestrator.start_migration().unwrap();
        assert_eq!(orchestrator.state().phase, MigrationPhase::Started);
        assert!(orchestrator.state().started_at.is_some());

        let again = orchestrator.start_migration();
        assert!(matches!(again, Err(MigrationError::WrongPhase { .. })));
    }

    #[tokio::test]
    async fn test_rollback_from_any_phase_increments_count() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);

        orchestrator.rollback().unwrap();
        assert_eq!(orchestrator.state().phase, MigrationPhase::RolledBack);
        assert_eq!(orchestrator.state().rollback_count, 1);

        orchestrator.rollback().unwrap();
        assert_eq!(orchestrator.state().rollback_count, 2);

        // Flag now points at the old implementation at full rollout.
        let flag = harness.flags.flag(EXECUTION_IMPL_FLAG).unwrap();
        assert_eq!(flag.value, FlagValue::from("mock_old"));
        assert_eq!(flag.rollout_percentage, 100);
    }

    #[tokio::test]
    async fn test_deploy_testnet_verifies_served_implementation() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        orchestrator.start_migration().unwrap();

        let healthy = orchestrator.deploy_testnet().await.unwrap();
        assert!(healthy);
        assert_eq!(orchestrator.state().phase, MigrationPhase::TestnetDeployed);
        assert!(!orchestrator.state().health_checks.is_empty());
    }

    #[tokio::test]
    async fn test_deploy_testnet_rejects_mismatched_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let flags = Arc::new(FeatureFlagManager::new(
            Environment::Testnet,
            FlagStore::new(dir.path().join("flags.json")),
        ));
        let monitor = Arc::new(AdapterHealthMonitor::new());
        let mut factory = AdapterFactory::new(Arc::clone(&flags), Arc::clone(&monitor));
        // Builder registered under "ghost" serves an adapter that reports a
        // different implementation name.
        factory.register_builder("ghost", || Ok(Arc::new(MockAdapter::new("impostor"))));

        let mut settings = fast_settings();
        settings.new_impl = "ghost".to_string();
        let orchestrator = MigrationOrchestrator::new(
            flags,
            Arc::new(factory),
            monitor,
            MigrationStateStore::new(dir.path().join("migration.json")),
            settings,
        )
        .unwrap();
        orchestrator.start_migration().unwrap();

        let result = orchestrator.deploy_testnet().await;
        assert!(matches!(result, Err(MigrationError::Validation(_))));
        // The failed gate leaves the phase where it was.
        assert_eq!(orchestrator.state().phase, MigrationPhase::Started);
    }

    #[tokio::test]
    async fn test_monitor_health_fails_on_consecutive_unhealthy() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);

        // Register and connect, then script unhealthiness.
        harness.flags.set(EXECUTION_IMPL_FLAG, FlagValue::from("mock_new"));
        harness.factory.get_adapter(None).await.unwrap();
        harness.new_adapter.set_healthy(false);

        let healthy = orchestrator
            .monitor_health(Duration::from_secs(5))
            .await;
        assert!(!healthy);

        // More than max_unhealthy consecutive checks were recorded.
        let state = orchestrator.state();
        assert!(state.health_checks.len() > 5);
        assert!(
            state
                .health_checks
                .iter()
                .all(|c| c.status.is_failing())
        );
    }

    #[tokio::test]
    async fn test_monitor_health_passes_when_healthy() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        harness.flags.set(EXECUTION_IMPL_FLAG, FlagValue::from("mock_new"));
        harness.factory.get_adapter(None).await.unwrap();

        let healthy = orchestrator
            .monitor_health(Duration::from_millis(100))
            .await;
        assert!(healthy);
    }

    #[tokio::test]
    async fn test_healthy_check_resets_streak() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        harness.flags.set(EXECUTION_IMPL_FLAG, FlagValue::from("mock_new"));
        harness.factory.get_adapter(None).await.unwrap();

        // Flip to unhealthy briefly, then recover before the streak limit.
        harness.new_adapter.set_healthy(false);
        let adapter = Arc::clone(&harness.new_adapter);
        let recover = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            adapter.set_healthy(true);
        });

        let healthy = orchestrator
            .monitor_health(Duration::from_millis(200))
            .await;
        recover.await.unwrap();
        assert!(healthy, "short unhealthy burst below the limit must not fail the window");
    }

    #[tokio::test]
    async fn test_cancellation_stops_monitoring() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        harness.flags.set(EXECUTION_IMPL_FLAG, FlagValue::from("mock_new"));
        harness.factory.get_adapter(None).await.unwrap();

        let token = orchestrator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let healthy = orchestrator.monitor_health(Duration::from_secs(60)).await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn test_validate_testnet_gate() {
        let harness = make_harness();

        // Seed a persisted state: deployed, with a 96%-healthy history.
        let store = MigrationStateStore::new(harness._dir.path().join("migration.json"));
        let mut seeded = MigrationState {
            phase: MigrationPhase::TestnetDeployed,
            ..Default::default()
        };
        for i in 0..100 {
            seeded.push_check(MigrationCheck {
                timestamp: Utc::now(),
                adapter: "mock_new".to_string(),
                status: if i < 4 {
                    HealthState::Unhealthy
                } else {
                    HealthState::Healthy
                },
                details: None,
            });
        }
        store.save(&seeded).unwrap();

        let orchestrator = MigrationOrchestrator::new(
            Arc::clone(&harness.flags),
            Arc::clone(&harness.factory),
            Arc::clone(&harness.monitor),
            store,
            fast_settings(),
        )
        .unwrap();

        let fraction = orchestrator.validate_testnet().unwrap();
        assert!(fraction >= 0.95);
        assert_eq!(orchestrator.state().phase, MigrationPhase::TestnetValidated);
    }

    #[tokio::test]
    async fn test_validate_testnet_fails_below_threshold() {
        let harness = make_harness();
        let store = MigrationStateStore::new(harness._dir.path().join("migration.json"));
        let mut seeded = MigrationState {
            phase: MigrationPhase::TestnetDeployed,
            ..Default::default()
        };
        for i in 0..100 {
            seeded.push_check(MigrationCheck {
                timestamp: Utc::now(),
                adapter: "mock_new".to_string(),
                status: if i < 10 {
                    HealthState::Unhealthy
                } else {
                    HealthState::Healthy
                },
                details: None,
            });
        }
        store.save(&seeded).unwrap();

        let orchestrator = MigrationOrchestrator::new(
            Arc::clone(&harness.flags),
            Arc::clone(&harness.factory),
            Arc::clone(&harness.monitor),
            store,
            fast_settings(),
        )
        .unwrap();

        let result = orchestrator.validate_testnet();
        assert!(matches!(result, Err(MigrationError::Validation(_))));
        // Gate failure leaves the phase unchanged.
        assert_eq!(orchestrator.state().phase, MigrationPhase::TestnetDeployed);
    }

    #[tokio::test]
    async fn test_validate_requires_deployed_phase() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        let result = orchestrator.validate_testnet();
        assert!(matches!(result, Err(MigrationError::WrongPhase { .. })));
    }

    #[tokio::test]
    async fn test_full_rollout_reaches_completed() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);

        orchestrator.start_migration().unwrap();
        assert!(orchestrator.deploy_testnet().await.unwrap());
        orchestrator.validate_testnet().unwrap();
        orchestrator.run_production_rollout().await.unwrap();

        let state = orchestrator.state();
        assert_eq!(state.phase, MigrationPhase::Completed);
        assert!(state.production_complete_at.is_some());

        // Traffic ends at 100% on the new implementation.
        let flag = harness.flags.flag(EXECUTION_IMPL_FLAG).unwrap();
        assert_eq!(flag.value, FlagValue::from("mock_new"));
        assert_eq!(flag.rollout_percentage, 100);
    }

    #[tokio::test]
    async fn test_unhealthy_canary_rolls_back() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);

        orchestrator.start_migration().unwrap();
        assert!(orchestrator.deploy_testnet().await.unwrap());
        orchestrator.validate_testnet().unwrap();

        // Canary goes out sick: 6 consecutive unhealthy checks with
        // max_unhealthy = 5 must force a rollback.
        harness.new_adapter.set_healthy(false);
        let result = orchestrator.run_production_rollout().await;

        assert!(matches!(result, Err(MigrationError::Validation(_))));
        let state = orchestrator.state();
        assert_eq!(state.phase, MigrationPhase::RolledBack);
        assert_eq!(state.rollback_count, 1);

        let flag = harness.flags.flag(EXECUTION_IMPL_FLAG).unwrap();
        assert_eq!(flag.value, FlagValue::from("mock_old"));
    }

    #[tokio::test]
    async fn test_rollout_requires_validated_phase() {
        let harness = make_harness();
        let orchestrator = make_orchestrator(&harness);
        let result = orchestrator.run_production_rollout().await;
        assert!(matches!(result, Err(MigrationError::WrongPhase { .. })));
    }

    #[tokio::test]
    async fn test_state_resumes_across_restart() {
        let harness = make_harness();
        let path = harness._dir.path().join("migration.json");

        {
            let store = MigrationStateStore::new(&path);
            let orchestrator = MigrationOrchestrator::new(
                Arc::clone(&harness.flags),
                Arc::clone(&harness.factory),
                Arc::clone(&harness.monitor),
                store,
                fast_settings(),
            )
            .unwrap();
            orchestrator.start_migration().unwrap();
        }

        let store = MigrationStateStore::new(&path);
        let resumed = MigrationOrchestrator::new(
            Arc::clone(&harness.flags),
            Arc::clone(&harness.factory),
            Arc::clone(&harness.monitor),
            store,
            fast_settings(),
        )
        .unwrap();
        assert_eq!(resumed.state().phase, MigrationPhase::Started);
    }
}
