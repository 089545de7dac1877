//! Execution algorithm policy configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::order_stack::ExecutionAlgo;
use crate::domain::shared::{InstrumentId, StrategyId};

/// Which algorithm broker orders use. Strategy overrides beat instrument
/// overrides, which beat the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Algorithm when no override applies.
    #[serde(default)]
    pub default_algo: ExecutionAlgo,
    /// Per-instrument overrides.
    #[serde(default)]
    pub instruments: HashMap<InstrumentId, ExecutionAlgo>,
    /// Per-strategy overrides.
    #[serde(default)]
    pub strategies: HashMap<StrategyId, ExecutionAlgo>,
}
