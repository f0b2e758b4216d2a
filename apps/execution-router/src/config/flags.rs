//! Feature-flag store configuration.

use serde::{Deserialize, Serialize};

/// Flag store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    /// Path of the JSON flag document.
    #[serde(default = "default_flags_path")]
    pub path: String,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            path: default_flags_path(),
        }
    }
}

fn default_flags_path() -> String {
    "flags.json".to_string()
}
