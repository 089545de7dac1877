//! Stage 6: applying execution reports.
//!
//! Reports that cannot be applied yet stay buffered in the handler: those
//! whose broker order is locked elsewhere, and those whose broker reference
//! is not recorded yet because the submitting handler has not confirmed
//! the submission. Reports for one broker reference are applied in the
//! order the broker produced them.

use std::collections::HashSet;

use tracing::{debug, error, warn};

use super::report::StageStats;
use super::stack_handler::StackHandler;
use crate::application::ports::ExecutionReport;
use crate::domain::shared::StoreError;
use crate::error::EngineResult;

/// Cycles after which an unmatched report is logged as suspicious.
const UNMATCHED_WARN_AFTER: u32 = 10;

/// A report waiting to be applied.
#[derive(Debug, Clone)]
pub struct PendingReport {
    report: ExecutionReport,
    attempts: u32,
}

impl StackHandler {
    pub(super) async fn process_fills(&self) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        let mut queue: Vec<PendingReport> = self.take_pending()?;
        match self.broker.poll_fills().await {
            Ok(reports) => queue.extend(
                reports
                    .into_iter()
                    .map(|report| PendingReport { report, attempts: 0 }),
            ),
            Err(e) => {
                warn!(error = %e, "Polling fills failed; applying buffered reports only");
                stats.errors += 1;
            }
        }

        let mut held_back = HashSet::new();
        let mut retained = Vec::new();
        let mut queue = queue.into_iter();
        while let Some(mut pending) = queue.next() {
            let broker_ref = pending.report.broker_ref.clone();
            if held_back.contains(&broker_ref) {
                retained.push(pending);
                continue;
            }
            match self.fills.apply_report(&pending.report).await {
                Ok(Some(outcome)) => {
                    stats.processed += 1;
                    if !outcome.propagated {
                        stats.lock_conflicts += 1;
                    }
                }
                Ok(None) => {
                    pending.attempts += 1;
                    if pending.attempts == UNMATCHED_WARN_AFTER {
                        warn!(
                            broker_ref = %broker_ref,
                            attempts = pending.attempts,
                            "Execution report still matches no broker order"
                        );
                    } else {
                        debug!(broker_ref = %broker_ref, "Execution report for unconfirmed order buffered");
                    }
                    stats.deferred += 1;
                    held_back.insert(broker_ref);
                    retained.push(pending);
                }
                Err(e) if e.is_lock_conflict() => {
                    stats.lock_conflicts += 1;
                    held_back.insert(broker_ref);
                    retained.push(pending);
                }
                Err(e) if e.is_fatal() => {
                    retained.push(pending);
                    retained.extend(queue);
                    self.restore_pending(retained)?;
                    return Err(e);
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(
                        broker_ref = %broker_ref,
                        filled = %pending.report.filled,
                        error = %e,
                        "Execution report could not be applied; dropped"
                    );
                }
            }
        }
        self.restore_pending(retained)?;
        Ok(stats)
    }

    /// Reports buffered for a later cycle.
    ///
    /// # Errors
    ///
    /// The buffer is poisoned.
    pub fn pending_reports(&self) -> EngineResult<usize> {
        Ok(self
            .pending_reports
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?
            .len())
    }

    fn take_pending(&self) -> EngineResult<Vec<PendingReport>> {
        let mut pending = self
            .pending_reports
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(pending.drain(..).collect())
    }

    fn restore_pending(&self, reports: Vec<PendingReport>) -> EngineResult<()> {
        let mut pending = self
            .pending_reports
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        // Anything buffered concurrently happened later.
        for report in reports.into_iter().rev() {
            pending.push_front(report);
        }
        Ok(())
    }
}
