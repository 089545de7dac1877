//! Observability configuration.

use serde::{Deserialize, Serialize};

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Address for the Prometheus listener (unset = no exporter).
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics_addr: None,
        }
    }
}

fn default_log_filter() -> String {
    "stack_engine=info".to_string()
}
