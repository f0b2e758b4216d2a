//! Feature flags with percentage rollout and change notification.
//!
//! Flags select and percentage-gate the active execution adapter. Resolution
//! for a subject (an account id, a strategy id) is deterministic: the same
//! `(flag, subject)` pair always lands in the same rollout bucket, across
//! process restarts and across services, because bucketing hashes with
//! FNV-1a rather than a per-process seeded hash.
//!
//! Mutations publish typed [`FlagChange`] events on a broadcast channel.
//! The send happens inside the same critical section as the mutation, so a
//! subscriber never observes a flag change without its notification, and
//! readers never see the new value before subscribers were notified.

mod store;

pub use store::{FlagStore, FlagStoreError};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Flag controlling which execution adapter implementation is active.
pub const EXECUTION_IMPL_FLAG: &str = "EXECUTION_IMPL";

/// Capacity of the flag-change broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Deployment environment a flag set belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development.
    Development,
    /// Exchange testnet.
    Testnet,
    /// Pre-production staging.
    Staging,
    /// Production.
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Testnet => write!(f, "testnet"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// A flag value. The manager is opinionless about the type — consumers
/// interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// Boolean toggle.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// String value (e.g. an implementation name).
    Str(String),
}

impl FlagValue {
    /// String view of the value, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of the value, if it is a bool.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl std::fmt::Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A feature flag scoped to one environment.
///
/// Flags are never hard-deleted, only disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Unique flag name.
    pub name: String,
    /// Current value.
    pub value: FlagValue,
    /// Environment this flag belongs to.
    pub environment: Environment,
    /// Whether the flag is active; disabled flags resolve to the default.
    pub enabled: bool,
    /// Percentage of subjects included, 0..=100.
    pub rollout_percentage: u8,
    /// Subjects always included, overriding the percentage.
    #[serde(default)]
    pub allowed_users: BTreeSet<String>,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Change event published on every flag mutation.
#[derive(Debug, Clone)]
pub struct FlagChange {
    /// Flag name.
    pub name: String,
    /// Value before the mutation, if the flag existed.
    pub old: Option<FlagValue>,
    /// Value after the mutation.
    pub new: FlagValue,
    /// Whether the flag is enabled after the mutation.
    pub enabled: bool,
    /// Rollout percentage after the mutation.
    pub rollout_percentage: u8,
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash.
///
/// Chosen over the standard library hasher because bucketing decisions must
/// be stable across process restarts and across services evaluating the same
/// flag — `DefaultHasher` is explicitly unstable between releases.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Rollout bucket in `0..100` for a `(flag, subject)` pair.
fn rollout_bucket(flag_name: &str, subject: &str) -> u8 {
    let key = format!("{flag_name}:{subject}");
    (fnv1a_64(key.as_bytes()) % 100) as u8
}

/// Manager owning the feature-flag set for one environment.
///
/// Reads are lock-cheap; mutations update `updated_at` and publish a
/// [`FlagChange`] inside the same critical section. Subscriber handlers run
/// on their own tasks and must be fast by contract — the send itself never
/// blocks the mutating caller.
#[derive(Debug)]
pub struct FeatureFlagManager {
    environment: Environment,
    store: FlagStore,
    flags: Mutex<HashMap<String, FeatureFlag>>,
    events: broadcast::Sender<FlagChange>,
}

impl FeatureFlagManager {
    /// Create a manager with the built-in defaults for `environment`.
    #[must_use]
    pub fn new(environment: Environment, store: FlagStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let defaults = builtin_defaults(environment)
            .into_iter()
            .map(|flag| (flag.name.clone(), flag))
            .collect();
        Self {
            environment,
            store,
            flags: Mutex::new(defaults),
            events,
        }
    }

    /// Environment this manager serves.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// Subscribe to flag-change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.events.subscribe()
    }

    /// Resolve a flag for an optional subject.
    ///
    /// Missing flags resolve to `default` with a warning; disabled flags
    /// resolve to `default` silently. Allow-listed subjects win over the
    /// percentage; otherwise subjects are bucketed deterministically.
    /// Without a subject the flag applies whenever rollout is above zero.
    #[must_use]
    pub fn get(&self, name: &str, default: FlagValue, subject: Option<&str>) -> FlagValue {
        let flags = self.lock();
        let Some(flag) = flags.get(name) else {
            drop(flags);
            tracing::warn!(flag = name, "Flag not found, using default");
            return default;
        };

        if !flag.enabled {
            return default;
        }

        let included = match subject {
            Some(subject) if !flag.allowed_users.is_empty() => {
                flag.allowed_users.contains(subject)
            }
            Some(subject) if flag.rollout_percentage < 100 => {
                rollout_bucket(name, subject) < flag.rollout_percentage
            }
            Some(_) => true,
            None => flag.rollout_percentage > 0,
        };

        if included {
            flag.value.clone()
        } else {
            default
        }
    }

    /// Set a flag's value, creating the flag at 100% rollout if new.
    pub fn set(&self, name: &str, value: FlagValue) {
        let now = Utc::now();
        let mut flags = self.lock();

        let old = flags.get(name).map(|f| f.value.clone());
        let flag = flags
            .entry(name.to_string())
            .and_modify(|flag| {
                flag.value = value.clone();
                flag.updated_at = now;
            })
            .or_insert_with(|| FeatureFlag {
                name: name.to_string(),
                value: value.clone(),
                environment: self.environment,
                enabled: true,
                rollout_percentage: 100,
                allowed_users: BTreeSet::new(),
                metadata: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            });

        let change = FlagChange {
            name: name.to_string(),
            old,
            new: flag.value.clone(),
            enabled: flag.enabled,
            rollout_percentage: flag.rollout_percentage,
        };
        // Publish while still holding the lock: no reader can observe the
        // new value before the notification exists.
        let _ = self.events.send(change);
        drop(flags);

        tracing::info!(flag = name, value = %value, "Flag updated");
    }

    /// Enable a flag at the given rollout percentage (clamped to 100).
    pub fn enable(&self, name: &str, rollout_percentage: u8) {
        self.set_enabled(name, true, rollout_percentage.min(100));
    }

    /// Disable a flag. Consumers fall back to their defaults.
    pub fn disable(&self, name: &str) {
        let current = {
            let flags = self.lock();
            flags.get(name).map(|f| f.rollout_percentage).unwrap_or(0)
        };
        self.set_enabled(name, false, current);
    }

    fn set_enabled(&self, name: &str, enabled: bool, rollout_percentage: u8) {
        let now = Utc::now();
        let mut flags = self.lock();

        let Some(flag) = flags.get_mut(name) else {
            drop(flags);
            tracing::warn!(flag = name, "Cannot toggle unknown flag");
            return;
        };

        let old = Some(flag.value.clone());
        flag.enabled = enabled;
        flag.rollout_percentage = rollout_percentage;
        flag.updated_at = now;

        let change = FlagChange {
            name: name.to_string(),
            old,
            new: flag.value.clone(),
            enabled,
            rollout_percentage,
        };
        let _ = self.events.send(change);
        drop(flags);

        tracing::info!(
            flag = name,
            enabled,
            rollout = rollout_percentage,
            "Flag toggled"
        );
    }

    /// Fetch one flag for display.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<FeatureFlag> {
        self.lock().get(name).cloned()
    }

    /// All flags for this environment, sorted by name.
    #[must_use]
    pub fn all_flags(&self) -> Vec<FeatureFlag> {
        let mut flags: Vec<_> = self.lock().values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }

    /// Merge stored flags over the built-in defaults; stored values win.
    ///
    /// Returns the number of flags loaded from the store.
    pub fn load(&self) -> Result<usize, FlagStoreError> {
        let stored = self.store.load(self.environment)?;
        let count = stored.len();

        let mut flags = self.lock();
        for flag in stored {
            flags.insert(flag.name.clone(), flag);
        }
        drop(flags);

        tracing::info!(
            environment = %self.environment,
            loaded = count,
            "Flags loaded from store"
        );
        Ok(count)
    }

    /// Persist all flags for this environment.
    ///
    /// A failed save leaves in-memory state authoritative; the error is
    /// logged and surfaced to the caller.
    pub fn save(&self) -> Result<(), FlagStoreError> {
        let snapshot = self.all_flags();
        self.store
            .save(self.environment, &snapshot)
            .inspect_err(|error| {
                tracing::error!(%error, "Failed to persist flags; in-memory state kept");
            })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FeatureFlag>> {
        self.flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Flags every environment starts with before the store is loaded.
fn builtin_defaults(environment: Environment) -> Vec<FeatureFlag> {
    let now = Utc::now();
    vec![FeatureFlag {
        name: EXECUTION_IMPL_FLAG.to_string(),
        value: FlagValue::from("paper"),
        environment,
        enabled: true,
        rollout_percentage: 100,
        allowed_users: BTreeSet::new(),
        metadata: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }]
}
