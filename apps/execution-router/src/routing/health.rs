//! Adapter health monitoring.
//!
//! Polls registered adapters, keeps a bounded per-adapter history and tracks
//! consecutive-failure streaks. The monitor only supplies a signal — it
//! never changes routing itself; the migration orchestrator (or an
//! operator) acts on it.
//!
//! Adapters are held through `Weak` references: monitoring a retired
//! adapter never keeps it alive.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::adapters::{AdapterHealth, ExecutionAdapter};
use crate::observability;

/// Health records retained per adapter.
pub const HEALTH_HISTORY_LIMIT: usize = 100;

/// Consecutive failures beyond which failover is advised.
pub const FAILOVER_THRESHOLD: u32 = 5;

/// Error rate above which a connected adapter counts as degraded.
const DEGRADED_ERROR_RATE: f64 = 0.10;

/// Classified health of one adapter at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Connected with an acceptable error rate.
    Healthy,
    /// Connected but erroring above the tolerated rate.
    Degraded,
    /// Not connected.
    Unhealthy,
    /// The health probe itself failed or the adapter is gone.
    Error,
}

impl HealthState {
    /// Whether this state counts against the failure streak.
    #[must_use]
    pub const fn is_failing(&self) -> bool {
        matches!(self, Self::Unhealthy | Self::Error)
    }

    /// Stable label for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Adapter name.
    pub adapter: String,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Classified status.
    pub status: HealthState,
    /// Raw details the adapter reported, if the probe succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<AdapterHealth>,
}

#[derive(Debug)]
struct Tracked {
    name: String,
    adapter: Weak<dyn ExecutionAdapter>,
    history: VecDeque<HealthRecord>,
    consecutive_failures: u32,
}

/// Monitor owning health history for every registered adapter.
#[derive(Debug, Default)]
pub struct AdapterHealthMonitor {
    // Vec keeps registration order for healthiest-adapter tie breaking.
    tracked: Mutex<Vec<Tracked>>,
}

impl AdapterHealthMonitor {
    /// Create an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an adapter. Idempotent per name: re-registering
    /// replaces the reference but keeps accumulated history.
    pub fn register(&self, name: &str, adapter: Weak<dyn ExecutionAdapter>) {
        let mut tracked = self.lock();
        if let Some(existing) = tracked.iter_mut().find(|t| t.name == name) {
            existing.adapter = adapter;
            return;
        }
        tracked.push(Tracked {
            name: name.to_string(),
            adapter,
            history: VecDeque::new(),
            consecutive_failures: 0,
        });
        drop(tracked);
        tracing::info!(adapter = name, "Adapter registered for health monitoring");
    }

    /// Probe every registered adapter once.
    ///
    /// Probes run without holding the registry lock; history and streaks are
    /// updated in one short critical section afterwards.
    pub async fn check_health(&self) -> HashMap<String, HealthRecord> {
        let probes: Vec<(String, Weak<dyn ExecutionAdapter>)> = self
            .lock()
            .iter()
            .map(|t| (t.name.clone(), t.adapter.clone()))
            .collect();

        let mut records = Vec::with_capacity(probes.len());
        for (name, weak) in probes {
            let record = match weak.upgrade() {
                None => HealthRecord {
                    adapter: name,
                    timestamp: Utc::now(),
                    status: HealthState::Error,
                    details: None,
                },
                Some(adapter) => Self::probe(&name, adapter.as_ref()).await,
            };
            records.push(record);
        }

        let mut tracked = self.lock();
        for record in &records {
            let Some(entry) = tracked.iter_mut().find(|t| t.name == record.adapter) else {
                continue;
            };

            if record.status.is_failing() {
                entry.consecutive_failures += 1;
            } else {
                entry.consecutive_failures = 0;
            }

            entry.history.push_back(record.clone());
            while entry.history.len() > HEALTH_HISTORY_LIMIT {
                entry.history.pop_front();
            }

            observability::record_health_status(&record.adapter, record.status.as_str());
            if entry.consecutive_failures > 0 {
                tracing::warn!(
                    adapter = %record.adapter,
                    status = %record.status,
                    streak = entry.consecutive_failures,
                    "Adapter health check failing"
                );
            }
        }
        drop(tracked);

        records
            .into_iter()
            .map(|record| (record.adapter.clone(), record))
            .collect()
    }

    async fn probe(name: &str, adapter: &dyn ExecutionAdapter) -> HealthRecord {
        let connected = adapter.is_connected();
        let (status, details) = match adapter.health().await {
            Err(error) => {
                tracing::warn!(adapter = name, %error, "Health probe failed");
                (HealthState::Error, None)
            }
            Ok(details) => {
                let status = if !connected || !details.connected {
                    HealthState::Unhealthy
                } else if details.error_rate > DEGRADED_ERROR_RATE {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                };
                (status, Some(details))
            }
        };

        HealthRecord {
            adapter: name.to_string(),
            timestamp: Utc::now(),
            status,
            details,
        }
    }

    /// Whether the adapter's failure streak warrants failing over.
    #[must_use]
    pub fn should_failover(&self, name: &str) -> bool {
        self.consecutive_failures(name) > FAILOVER_THRESHOLD
    }

    /// Current consecutive-failure streak for an adapter.
    #[must_use]
    pub fn consecutive_failures(&self, name: &str) -> u32 {
        self.lock()
            .iter()
            .find(|t| t.name == name)
            .map_or(0, |t| t.consecutive_failures)
    }

    /// Adapter with the lowest failure streak; first registered wins ties.
    #[must_use]
    pub fn healthiest_adapter(&self) -> Option<String> {
        self.lock()
            .iter()
            .min_by_key(|t| t.consecutive_failures)
            .map(|t| t.name.clone())
    }

    /// Recorded history for an adapter, oldest first.
    #[must_use]
    pub fn history(&self, name: &str) -> Vec<HealthRecord> {
        self.lock()
            .iter()
            .find(|t| t.name == name)
            .map_or_else(Vec::new, |t| t.history.iter().cloned().collect())
    }

    /// Poll all adapters on a fixed interval until shutdown.
    ///
    /// Exits after finishing the in-flight check when the shutdown signal
    /// arrives.
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = interval.as_secs(),
            "Adapter health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checks = self.check_health().await;
                    tracing::trace!(adapters = checks.len(), "Health sweep complete");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Adapter health monitor shutting down");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Tracked>> {
        self.tracked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
