//! Order stack and ledger persistence configuration.

use serde::{Deserialize, Serialize};

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// JSON files in `data_dir`, rewritten atomically on every change.
    Json,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: PersistenceBackend,
    /// Directory for the JSON backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}
