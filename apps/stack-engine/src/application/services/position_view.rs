//! Positions derived from the ledger plus fills still in the stacks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::order_stack::{BrokerStack, OrderFilter};
use crate::domain::positions::PositionLedger;
use crate::domain::shared::{ContractId, InstrumentId};
use crate::error::EngineResult;

/// Read-only view of internally tracked positions.
///
/// Broker order fills are the source of truth for orders still in the
/// stacks. A contract order's fills move to the ledger when its family is
/// removed; broker orders whose parent is already booked are skipped so a
/// crash between booking and removal never double counts.
#[derive(Clone)]
pub struct PositionView {
    brokers: BrokerStack,
    ledger: Arc<dyn PositionLedger>,
}

impl PositionView {
    /// Create a view.
    #[must_use]
    pub fn new(brokers: BrokerStack, ledger: Arc<dyn PositionLedger>) -> Self {
        Self { brokers, ledger }
    }

    /// Net position per contract, zero positions omitted.
    pub fn contract_positions(
        &self,
        instrument: &InstrumentId,
    ) -> EngineResult<BTreeMap<ContractId, i64>> {
        let mut positions = self.ledger.contract_positions(instrument)?;
        let in_stack = self
            .brokers
            .scan(&OrderFilter::all().instrument(instrument.clone()))?;
        for order in in_stack {
            if let Some(parent) = order.parent {
                if self.ledger.is_booked(parent)? {
                    continue;
                }
            }
            for (contract, qty) in order.detail.legs.iter().zip(order.fill.legs()) {
                *positions.entry(contract.clone()).or_default() += qty;
            }
        }
        positions.retain(|_, qty| *qty != 0);
        Ok(positions)
    }

    /// Net position across contracts.
    pub fn net_position(&self, instrument: &InstrumentId) -> EngineResult<i64> {
        Ok(self.contract_positions(instrument)?.values().sum())
    }

    /// Whether a broker order of the instrument is at the broker and may
    /// still execute. Its executions can be ahead of the fills polled so far.
    pub fn has_working_orders(&self, instrument: &InstrumentId) -> EngineResult<bool> {
        let live = self
            .brokers
            .scan(&OrderFilter::all().instrument(instrument.clone()).live())?;
        Ok(live
            .iter()
            .any(|o| o.state.can_fill() && o.detail.is_submitted_or_reserved()))
    }

    /// Instruments with booked positions or orders in the broker stack.
    pub fn instruments(&self) -> EngineResult<Vec<InstrumentId>> {
        let mut instruments: BTreeSet<InstrumentId> =
            self.ledger.instruments()?.into_iter().collect();
        for order in self.brokers.scan(&OrderFilter::all())? {
            instruments.insert(order.instrument_id);
        }
        Ok(instruments.into_iter().collect())
    }
}

impl std::fmt::Debug for PositionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionView").finish_non_exhaustive()
    }
}
