//! Forced roll configuration.

use serde::{Deserialize, Serialize};

/// Roll settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollsConfig {
    /// Generate forced roll orders.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Roll positions when the held contract expires within this many days.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for RollsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_days: default_window_days(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_window_days() -> i64 {
    5
}
