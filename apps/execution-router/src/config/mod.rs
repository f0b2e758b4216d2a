//! Configuration for the execution router.
//!
//! Settings load from a YAML file with serde defaults for every section, so
//! a missing file or a partial file still yields a runnable configuration.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_router::config::load_config;
//!
//! // Load from the default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from a custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//! ```

mod environment;
mod flags;
mod health;
mod migration;
mod observability;
mod resilience;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use environment::EnvironmentConfig;
pub use flags::FlagsConfig;
pub use health::HealthConfig;
pub use migration::MigrationConfig;
pub use observability::ObservabilityConfig;
pub use resilience::{
    CircuitBreakerSettings, RateLimitSettings, ResilienceConfig, RetrySettings,
};

/// Default configuration file path.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path to the config file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Feature-flag store settings.
    #[serde(default)]
    pub flags: FlagsConfig,
    /// Fault-tolerance settings for live adapters.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Health monitor settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Migration orchestrator settings.
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Metrics settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Load configuration from a YAML file.
///
/// An explicitly given path must exist; the default path falls back to
/// built-in defaults when absent.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (DEFAULT_CONFIG_PATH, false),
    };

    if !std::path::Path::new(path).exists() {
        if explicit {
            return Err(ConfigError::Read {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        tracing::info!(path, "No config file found, using defaults");
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let config: Config = serde_yaml_bw::from_str(&raw)?;
    config.validate()?;

    tracing::info!(path, environment = %config.environment.mode, "Configuration loaded");
    Ok(config)
}

impl Config {
    /// Cross-field validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.environment.parse_environment()?;
        if self.migration.canary_percentage > 100 {
            return Err(ConfigError::Validation(format!(
                "canary_percentage {} exceeds 100",
                self.migration.canary_percentage
            )));
        }
        if self.migration.rollout_steps.iter().any(|s| *s > 100) {
            return Err(ConfigError::Validation(
                "rollout_steps must be percentages in 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r"
environment:
  mode: testnet
migration:
  canary_percentage: 5
";
        let config: Config = serde_yaml_bw::from_str(yaml).unwrap();
        assert_eq!(config.environment.mode, "testnet");
        assert_eq!(config.migration.canary_percentage, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.health.check_interval_secs, 30);
        assert_eq!(config.resilience.retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_canary_percentage_rejected() {
        let yaml = r"
migration:
  canary_percentage: 150
";
        let config: Config = serde_yaml_bw::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_default_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.environment.mode, "development");
    }

    #[test]
    fn test_missing_explicit_path_errors() {
        assert!(load_config(Some("/nonexistent/config.yaml")).is_err());
    }
}
