//! Handler stage scheduling configuration.

use serde::{Deserialize, Serialize};

use super::schedule::TimeWindow;

/// Handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Prefix of the holder id this process uses for order locks.
    #[serde(default = "default_holder_prefix")]
    pub holder_prefix: String,
    /// Per-stage scheduling.
    #[serde(default)]
    pub stages: StagesConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            holder_prefix: default_holder_prefix(),
            stages: StagesConfig::default(),
        }
    }
}

fn default_holder_prefix() -> String {
    "stack-handler".to_string()
}

/// Scheduling of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Minimum seconds between two runs of the stage (0 = every cycle).
    #[serde(default)]
    pub min_interval_secs: u64,
    /// Maximum runs per handler process lifetime (unset = unlimited).
    #[serde(default)]
    pub max_executions_per_run: Option<u32>,
    /// Time of day the stage may run (unset = always).
    #[serde(default)]
    pub active_window: Option<TimeWindow>,
}

impl StageConfig {
    /// Stage that runs at most every `secs` seconds.
    #[must_use]
    pub const fn every(secs: u64) -> Self {
        Self {
            min_interval_secs: secs,
            max_executions_per_run: None,
            active_window: None,
        }
    }
}

/// Scheduling for every stage of the handler cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Stage 1.
    pub check_position_breaks: StageConfig,
    /// Stage 2.
    pub spawn_contract_orders: StageConfig,
    /// Stage 3.
    pub generate_roll_orders: StageConfig,
    /// Stage 4.
    pub create_broker_orders: StageConfig,
    /// Stage 5.
    pub submit_broker_orders: StageConfig,
    /// Stage 6.
    pub process_fills: StageConfig,
    /// Stage 7.
    pub handle_completed_orders: StageConfig,
    /// Stage 8.
    pub remove_completed_orders: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            check_position_breaks: StageConfig::every(60),
            spawn_contract_orders: StageConfig::default(),
            // Once a day is enough; the duplicate-key rule covers overlaps.
            generate_roll_orders: StageConfig::every(86_400),
            create_broker_orders: StageConfig::default(),
            submit_broker_orders: StageConfig::default(),
            process_fills: StageConfig::default(),
            handle_completed_orders: StageConfig::default(),
            remove_completed_orders: StageConfig::default(),
        }
    }
}

impl StagesConfig {
    /// Every stage runs on every cycle.
    #[must_use]
    pub fn every_cycle() -> Self {
        Self {
            check_position_breaks: StageConfig::default(),
            spawn_contract_orders: StageConfig::default(),
            generate_roll_orders: StageConfig::default(),
            create_broker_orders: StageConfig::default(),
            submit_broker_orders: StageConfig::default(),
            process_fills: StageConfig::default(),
            handle_completed_orders: StageConfig::default(),
            remove_completed_orders: StageConfig::default(),
        }
    }
}
