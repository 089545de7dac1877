//! Position reconciliation configuration.

use serde::{Deserialize, Serialize};

/// Reconciliation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Contracts of divergence tolerated before a break is reported
    /// (0 = exact match required).
    #[serde(default)]
    pub position_tolerance: u64,
}
