//! JSON file persistence for feature flags.
//!
//! One document holds every environment's flags:
//!
//! ```json
//! {
//!   "version": 3,
//!   "updatedAt": "2026-08-01T12:00:00Z",
//!   "flags": {
//!     "EXECUTION_IMPL": {
//!       "production": { "value": "live_v1", "enabled": true, "rolloutPercentage": 100 }
//!     }
//!   }
//! }
//! ```
//!
//! Saves rewrite the whole document but only the active environment's
//! subtree changes — other environments round-trip untouched. Writes go to a
//! temp file first and are renamed into place so a crash mid-write leaves
//! the previous committed document intact.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Environment, FeatureFlag, FlagValue};

/// Errors from flag persistence.
#[derive(Debug, Error)]
pub enum FlagStoreError {
    /// Failed to read the flag file.
    #[error("failed to read flag store '{path}': {source}")]
    Read {
        /// Path to the flag file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to write the flag file.
    #[error("failed to write flag store '{path}': {source}")]
    Write {
        /// Path to the flag file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Document is not valid JSON.
    #[error("failed to parse flag store: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-flag, per-environment stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredFlag {
    value: FlagValue,
    enabled: bool,
    rollout_percentage: u8,
    #[serde(default)]
    allowed_users: BTreeSet<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Whole-file document: flag name → environment → record.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagDocument {
    version: u64,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    flags: BTreeMap<String, BTreeMap<Environment, StoredFlag>>,
}

/// File-backed store for feature flags.
#[derive(Debug, Clone)]
pub struct FlagStore {
    path: PathBuf,
}

impl FlagStore {
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

    /// Load all flags for one environment. A missing file yields no flags.
    pub fn load(&self, environment: Environment) -> Result<Vec<FeatureFlag>, FlagStoreError> {
        let document = self.read_document()?;
        let flags = document
            .flags
            .into_iter()
            .filter_map(|(name, environments)| {
                environments
                    .get(&environment)
                    .map(|stored| FeatureFlag {
                        name,
                        value: stored.value.clone(),
                        environment,
                        enabled: stored.enabled,
                        rollout_percentage: stored.rollout_percentage.min(100),
                        allowed_users: stored.allowed_users.clone(),
                        metadata: stored.metadata.clone(),
                        created_at: stored.created_at,
                        updated_at: stored.updated_at,
                    })
            })
            .collect();
        Ok(flags)
    }

    /// Save one environment's flags, preserving every other environment.
    pub fn save(
        &self,
        environment: Environment,
        flags: &[FeatureFlag],
    ) -> Result<(), FlagStoreError> {
        let mut document = self.read_document()?;

        for flag in flags {
            document
                .flags
                .entry(flag.name.clone())
                .or_default()
                .insert(
                    environment,
                    StoredFlag {
                        value: flag.value.clone(),
                        enabled: flag.enabled,
                        rollout_percentage: flag.rollout_percentage,
                        allowed_users: flag.allowed_users.clone(),
                        metadata: flag.metadata.clone(),
                        created_at: flag.created_at,
                        updated_at: flag.updated_at,
                    },
                );
        }

        document.version += 1;
        document.updated_at = Some(Utc::now());

        self.write_document(&document)
    }

    fn read_document(&self) -> Result<FlagDocument, FlagStoreError> {
        if !self.path.exists() {
            return Ok(FlagDocument::default());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| FlagStoreError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_document(&self, document: &FlagDocument) -> Result<(), FlagStoreError> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");

        let write_err = |source| FlagStoreError::Write {
            path: self.path.display().to_string(),
            source,
        };
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(name: &str, environment: Environment, value: FlagValue) -> FeatureFlag {
        let now = Utc::now();
        FeatureFlag {
            name: name.to_string(),
            value,
            environment,
            enabled: true,
            rollout_percentage: 100,
            allowed_users: BTreeSet::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlagStore::new(dir.path().join("flags.json"));
        assert!(store.load(Environment::Production).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlagStore::new(dir.path().join("flags.json"));

        let flags = vec![flag(
            "EXECUTION_IMPL",
            Environment::Production,
            FlagValue::from("live_v2"),
        )];
        store.save(Environment::Production, &flags).unwrap();

        let loaded = store.load(Environment::Production).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "EXECUTION_IMPL");
        assert_eq!(loaded[0].value, FlagValue::from("live_v2"));
    }

    #[test]
    fn test_save_preserves_other_environments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlagStore::new(dir.path().join("flags.json"));

        store
            .save(
                Environment::Testnet,
                &[flag(
                    "EXECUTION_IMPL",
                    Environment::Testnet,
                    FlagValue::from("live_v2"),
                )],
            )
            .unwrap();
        store
            .save(
                Environment::Production,
                &[flag(
                    "EXECUTION_IMPL",
                    Environment::Production,
                    FlagValue::from("live_v1"),
                )],
            )
            .unwrap();

        let testnet = store.load(Environment::Testnet).unwrap();
        assert_eq!(testnet[0].value, FlagValue::from("live_v2"));

        let production = store.load(Environment::Production).unwrap();
        assert_eq!(production[0].value, FlagValue::from("live_v1"));
    }

    #[test]
    fn test_version_bumps_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FlagStore::new(&path);

        let flags = [flag("A", Environment::Development, FlagValue::from(true))];
        store.save(Environment::Development, &flags).unwrap();
        store.save(Environment::Development, &flags).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], 2);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let store = FlagStore::new(&path);

        store
            .save(
                Environment::Development,
                &[flag("A", Environment::Development, FlagValue::from(1.0))],
            )
            .unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
