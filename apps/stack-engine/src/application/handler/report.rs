//! What one handler cycle did.

use chrono::{DateTime, Utc};

use super::stage::{SkipReason, Stage};

/// Counters for one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Orders or reports acted on.
    pub processed: usize,
    /// Orders deliberately left for a later cycle.
    pub deferred: usize,
    /// Locks that could not be acquired.
    pub lock_conflicts: usize,
    /// Per-order failures that did not abort the stage.
    pub errors: usize,
}

impl StageStats {
    /// Whether the stage ran without conflicts or errors.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.lock_conflicts == 0 && self.errors == 0
    }
}

/// Outcome of one stage in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran.
    Ran(StageStats),
    /// The stage was not due or was gated.
    Skipped(SkipReason),
    /// The stage failed as a whole; later stages still ran.
    Failed(String),
}

impl StageOutcome {
    /// Label used in metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ran(_) => "ran",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-stage outcomes of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Time the cycle was run for.
    pub started_at: DateTime<Utc>,
    /// Outcomes in stage order.
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl CycleReport {
    /// Empty report.
    #[must_use]
    pub const fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            stages: Vec::new(),
        }
    }

    /// Record a stage outcome.
    pub fn push(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push((stage, outcome));
    }

    /// Outcome of `stage`, if it was reached.
    #[must_use]
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }

    /// Stats of `stage`, if it ran.
    #[must_use]
    pub fn stats(&self, stage: Stage) -> Option<StageStats> {
        match self.outcome(stage) {
            Some(StageOutcome::Ran(stats)) => Some(*stats),
            _ => None,
        }
    }

    /// Whether `stage` ran.
    #[must_use]
    pub fn ran(&self, stage: Stage) -> bool {
        self.stats(stage).is_some()
    }

    /// Lock conflicts across all stages.
    #[must_use]
    pub fn lock_conflicts(&self) -> usize {
        self.stages
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                StageOutcome::Ran(stats) => Some(stats.lock_conflicts),
                _ => None,
            })
            .sum()
    }

    /// Errors across all stages; a failed stage counts as one.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.stages
            .iter()
            .map(|(_, outcome)| match outcome {
                StageOutcome::Ran(stats) => stats.errors,
                StageOutcome::Failed(_) => 1,
                StageOutcome::Skipped(_) => 0,
            })
            .sum()
    }

    /// Whether nothing so far reported a lock conflict or error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.lock_conflicts() == 0 && self.errors() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_until_a_stage_reports_conflicts() {
        let mut report = CycleReport::new(Utc::now());
        report.push(
            Stage::SpawnContractOrders,
            StageOutcome::Ran(StageStats {
                processed: 3,
                ..StageStats::default()
            }),
        );
        assert!(report.is_clean());
        assert!(report.ran(Stage::SpawnContractOrders));

        report.push(
            Stage::ProcessFills,
            StageOutcome::Ran(StageStats {
                lock_conflicts: 2,
                ..StageStats::default()
            }),
        );
        assert!(!report.is_clean());
        assert_eq!(report.lock_conflicts(), 2);
    }

    #[test]
    fn failed_stage_counts_as_error() {
        let mut report = CycleReport::new(Utc::now());
        report.push(Stage::CheckPositionBreaks, StageOutcome::Failed("timeout".into()));
        report.push(
            Stage::GenerateRollOrders,
            StageOutcome::Skipped(SkipReason::ExecutionLimit),
        );
        assert_eq!(report.errors(), 1);
        assert!(!report.ran(Stage::GenerateRollOrders));
        assert_eq!(report.outcome(Stage::ProcessFills), None);
    }
}
