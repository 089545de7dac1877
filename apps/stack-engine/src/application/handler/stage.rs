//! Handler stages and their per-stage scheduling.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{StageConfig, StagesConfig};

/// One stage of the handler cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Compare internal and broker positions.
    CheckPositionBreaks,
    /// Decompose instrument orders into contract orders.
    SpawnContractOrders,
    /// Emit forced rolls for expiring contracts.
    GenerateRollOrders,
    /// Decompose contract orders into broker orders.
    CreateBrokerOrders,
    /// Transmit broker orders.
    SubmitBrokerOrders,
    /// Apply execution reports.
    ProcessFills,
    /// Re-derive aggregates and promote resolved orders to completed.
    HandleCompletedOrders,
    /// Book and delete completed order families.
    RemoveCompletedOrders,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Self; 8] = [
        Self::CheckPositionBreaks,
        Self::SpawnContractOrders,
        Self::GenerateRollOrders,
        Self::CreateBrokerOrders,
        Self::SubmitBrokerOrders,
        Self::ProcessFills,
        Self::HandleCompletedOrders,
        Self::RemoveCompletedOrders,
    ];

    /// Stage name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CheckPositionBreaks => "check_position_breaks",
            Self::SpawnContractOrders => "spawn_contract_orders",
            Self::GenerateRollOrders => "generate_roll_orders",
            Self::CreateBrokerOrders => "create_broker_orders",
            Self::SubmitBrokerOrders => "submit_broker_orders",
            Self::ProcessFills => "process_fills",
            Self::HandleCompletedOrders => "handle_completed_orders",
            Self::RemoveCompletedOrders => "remove_completed_orders",
        }
    }

    /// This stage's scheduling.
    #[must_use]
    pub const fn config(self, stages: &StagesConfig) -> &StageConfig {
        match self {
            Self::CheckPositionBreaks => &stages.check_position_breaks,
            Self::SpawnContractOrders => &stages.spawn_contract_orders,
            Self::GenerateRollOrders => &stages.generate_roll_orders,
            Self::CreateBrokerOrders => &stages.create_broker_orders,
            Self::SubmitBrokerOrders => &stages.submit_broker_orders,
            Self::ProcessFills => &stages.process_fills,
            Self::HandleCompletedOrders => &stages.handle_completed_orders,
            Self::RemoveCompletedOrders => &stages.remove_completed_orders,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a stage did not run this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Its minimum interval has not elapsed.
    NotDue {
        /// Earliest time it may run again.
        next_due: DateTime<Utc>,
    },
    /// It reached its execution limit for this process.
    ExecutionLimit,
    /// The time of day is outside its active window.
    OutsideWindow,
    /// An earlier stage reported lock conflicts or errors.
    Gated,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDue { next_due } => write!(f, "not due until {next_due}"),
            Self::ExecutionLimit => write!(f, "execution limit reached"),
            Self::OutsideWindow => write!(f, "outside active window"),
            Self::Gated => write!(f, "gated by earlier stage"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StageRuns {
    last_run: Option<DateTime<Utc>>,
    executions: u32,
}

/// Tracks when each stage last ran and how often.
#[derive(Debug)]
pub struct StageTracker {
    config: StagesConfig,
    runs: HashMap<Stage, StageRuns>,
}

impl StageTracker {
    /// Tracker with no recorded runs.
    #[must_use]
    pub fn new(config: StagesConfig) -> Self {
        Self {
            config,
            runs: HashMap::new(),
        }
    }

    /// `None` if `stage` may run at `now`, otherwise why not.
    #[must_use]
    pub fn check(&self, stage: Stage, now: DateTime<Utc>) -> Option<SkipReason> {
        let config = stage.config(&self.config);
        let runs = self.runs.get(&stage).copied().unwrap_or_default();

        if let Some(window) = config.active_window {
            if !window.contains(now.time()) {
                return Some(SkipReason::OutsideWindow);
            }
        }
        if config
            .max_executions_per_run
            .is_some_and(|max| runs.executions >= max)
        {
            return Some(SkipReason::ExecutionLimit);
        }
        if let Some(last_run) = runs.last_run {
            // An interval past chrono's range never comes due again.
            let next_due = i64::try_from(config.min_interval_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|interval| last_run.checked_add_signed(interval))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if now < next_due {
                return Some(SkipReason::NotDue { next_due });
            }
        }
        None
    }

    /// Record that `stage` ran at `now`.
    pub fn record_run(&mut self, stage: Stage, now: DateTime<Utc>) {
        let runs = self.runs.entry(stage).or_default();
        runs.last_run = Some(now);
        runs.executions = runs.executions.saturating_add(1);
    }

    /// Times `stage` has run.
    #[must_use]
    pub fn executions(&self, stage: Stage) -> u32 {
        self.runs.get(&stage).map_or(0, |r| r.executions)
    }
}
