//! Position reconciliation against the broker.
//!
//! The reconciler compares and reports; it never mutates orders or
//! positions. Breaks are held in a [`BreakRegistry`] until acknowledged.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::position_view::PositionView;
use crate::application::ports::BrokerPort;
use crate::domain::positions::{BreakStatus, BreakStore, PositionBreak};
use crate::domain::shared::{InstrumentId, StoreError};
use crate::error::EngineResult;
use crate::observability::{record_reconciliation, set_open_breaks};

/// Compares internal and broker-reported positions.
#[derive(Clone)]
pub struct PositionReconciler {
    view: PositionView,
    broker: Arc<dyn BrokerPort>,
    tolerance: u64,
}

impl PositionReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(view: PositionView, broker: Arc<dyn BrokerPort>, tolerance: u64) -> Self {
        Self {
            view,
            broker,
            tolerance,
        }
    }

    /// Check one instrument.
    pub async fn check(&self, instrument: &InstrumentId) -> EngineResult<BreakStatus> {
        let reported = self.broker.reported_positions().await?;
        let internal = self.view.net_position(instrument)?;
        let broker = reported.get(instrument).copied().unwrap_or(0);
        let status = compare(instrument, internal, broker, self.tolerance, Utc::now());
        record_reconciliation(instrument.as_str(), status.is_broken());
        Ok(status)
    }

    /// Check every instrument known internally or to the broker, with a
    /// single broker call.
    ///
    /// Instruments with working broker orders are left out: executions the
    /// broker already counts may not have been polled yet.
    pub async fn check_all(&self) -> EngineResult<Vec<(InstrumentId, BreakStatus)>> {
        let reported: HashMap<InstrumentId, i64> = self.broker.reported_positions().await?;
        let mut instruments: BTreeSet<InstrumentId> = self.view.instruments()?.into_iter().collect();
        instruments.extend(reported.keys().cloned());

        let now = Utc::now();
        let mut results = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            if self.view.has_working_orders(&instrument)? {
                debug!(instrument = %instrument, "Orders working; reconciliation postponed");
                continue;
            }
            let internal = self.view.net_position(&instrument)?;
            let broker = reported.get(&instrument).copied().unwrap_or(0);
            let status = compare(&instrument, internal, broker, self.tolerance, now);
            record_reconciliation(instrument.as_str(), status.is_broken());
            results.push((instrument, status));
        }
        Ok(results)
    }
}

impl std::fmt::Debug for PositionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionReconciler")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

/// Compare two net positions.
#[must_use]
pub fn compare(
    instrument: &InstrumentId,
    internal: i64,
    broker: i64,
    tolerance: u64,
    now: DateTime<Utc>,
) -> BreakStatus {
    let delta = internal - broker;
    if delta.unsigned_abs() <= tolerance {
        BreakStatus::Ok
    } else {
        BreakStatus::Broken(PositionBreak {
            instrument: instrument.clone(),
            internal,
            broker,
            delta,
            detected_at: now,
        })
    }
}

/// Open position breaks, shared by every component that gates on them.
///
/// Reads and writes go straight to the [`BreakStore`], so a break opened by
/// one worker gates every other worker and survives restarts.
#[derive(Clone)]
pub struct BreakRegistry {
    store: Arc<dyn BreakStore>,
}

impl BreakRegistry {
    /// Registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BreakStore>) -> Self {
        Self { store }
    }

    /// Record a break. Returns `true` if the instrument was not already broken.
    pub fn record(&self, position_break: PositionBreak) -> Result<bool, StoreError> {
        let instrument = position_break.instrument.clone();
        let (internal, broker, delta) = (
            position_break.internal,
            position_break.broker,
            position_break.delta,
        );
        let is_new = self.store.record(position_break)?;
        if is_new {
            warn!(
                instrument = %instrument,
                internal,
                broker,
                delta,
                "Position break detected; order generation suspended"
            );
            set_open_breaks(self.store.open_breaks()?.len());
        }
        Ok(is_new)
    }

    /// Whether the instrument is gated.
    pub fn is_broken(&self, instrument: &InstrumentId) -> Result<bool, StoreError> {
        self.store.is_broken(instrument)
    }

    /// Clear a break after external review.
    pub fn acknowledge(&self, instrument: &InstrumentId) -> Result<Option<PositionBreak>, StoreError> {
        let cleared = self.store.acknowledge(instrument)?;
        if cleared.is_some() {
            info!(instrument = %instrument, "Position break acknowledged");
            set_open_breaks(self.store.open_breaks()?.len());
        }
        Ok(cleared)
    }

    /// All open breaks.
    pub fn open_breaks(&self) -> Result<Vec<PositionBreak>, StoreError> {
        self.store.open_breaks()
    }
}

impl std::fmt::Debug for BreakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::InMemoryBreakStore;

    #[test]
    fn divergence_within_tolerance_is_ok() {
        let sofr = InstrumentId::new("SOFR");
        assert_eq!(compare(&sofr, 5, 5, 0, Utc::now()), BreakStatus::Ok);
        assert_eq!(compare(&sofr, 5, 4, 1, Utc::now()), BreakStatus::Ok);
    }

    #[test]
    fn divergence_beyond_tolerance_breaks() {
        let sofr = InstrumentId::new("SOFR");
        let BreakStatus::Broken(b) = compare(&sofr, 5, 3, 0, Utc::now()) else {
            panic!("expected a break");
        };
        assert_eq!(b.delta, 2);
        assert_eq!(b.internal, 5);
        assert_eq!(b.broker, 3);
    }

    #[test]
    fn registry_keeps_first_break_until_acknowledged() {
        let registry = BreakRegistry::new(Arc::new(InMemoryBreakStore::new()));
        let sofr = InstrumentId::new("SOFR");
        let b = PositionBreak {
            instrument: sofr.clone(),
            internal: 5,
            broker: 3,
            delta: 2,
            detected_at: Utc::now(),
        };
        assert!(registry.record(b.clone()).unwrap());
        assert!(!registry.record(b).unwrap());
        assert!(registry.is_broken(&sofr).unwrap());
        assert!(!registry.is_broken(&InstrumentId::new("BUND")).unwrap());

        assert!(registry.acknowledge(&sofr).unwrap().is_some());
        assert!(!registry.is_broken(&sofr).unwrap());
        assert!(registry.open_breaks().unwrap().is_empty());
    }
}
