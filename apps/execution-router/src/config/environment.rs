//! Deployment environment configuration.

use serde::{Deserialize, Serialize};

use crate::flags::Environment;

use super::ConfigError;

/// Environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name: development | testnet | staging | production.
    #[serde(default = "default_environment_mode")]
    pub mode: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mode: default_environment_mode(),
        }
    }
}

impl EnvironmentConfig {
    /// Parse the configured mode into a typed [`Environment`].
    pub fn parse_environment(&self) -> Result<Environment, ConfigError> {
        match self.mode.to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "testnet" => Ok(Environment::Testnet),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(ConfigError::Validation(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

fn default_environment_mode() -> String {
    "development".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_environments() {
        for (mode, expected) in [
            ("development", Environment::Development),
            ("testnet", Environment::Testnet),
            ("staging", Environment::Staging),
            ("PRODUCTION", Environment::Production),
        ] {
            let config = EnvironmentConfig {
                mode: mode.to_string(),
            };
            assert_eq!(config.parse_environment().unwrap(), expected);
        }
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let config = EnvironmentConfig {
            mode: "moon".to_string(),
        };
        assert!(config.parse_environment().is_err());
    }
}
