//! Forced rolls out of expiring contracts.
//!
//! For every held contract inside the roll window, the roll manager emits
//! one instrument order owned by the roll pseudo-strategy with trade
//! `[-position, +position]` and a [`RollSpec`] naming both contracts. The
//! handler decomposes it into a closing and an opening contract order in a
//! single atomic insert.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use super::position_view::PositionView;
use crate::domain::contracts::{ContractSpec, ContractUniverse};
use crate::domain::order_stack::{
    ContractStack, InstrumentDetail, InstrumentStack, InstrumentTier, NewOrder, OrderFilter,
    RollSpec,
};
use crate::domain::shared::{ContractId, InstrumentId, StrategyId, TradeVector};
use crate::error::{EngineError, EngineResult};

/// Generates forced roll orders.
#[derive(Clone)]
pub struct RollManager {
    instruments: InstrumentStack,
    contracts: ContractStack,
    positions: PositionView,
    universe: Arc<dyn ContractUniverse>,
    window_days: i64,
}

impl RollManager {
    /// Create a roll manager.
    #[must_use]
    pub fn new(
        instruments: InstrumentStack,
        contracts: ContractStack,
        positions: PositionView,
        universe: Arc<dyn ContractUniverse>,
        window_days: i64,
    ) -> Self {
        Self {
            instruments,
            contracts,
            positions,
            universe,
            window_days,
        }
    }

    /// Roll orders due on `as_of`.
    ///
    /// Instruments with a live roll order are skipped, so calling this again
    /// before the previous roll completes yields nothing new. Holding a
    /// contract with no later contract to roll into is a fatal
    /// configuration error.
    pub fn orders_to_roll(&self, as_of: NaiveDate) -> EngineResult<Vec<NewOrder<InstrumentTier>>> {
        let mut orders = Vec::new();
        for instrument in self.positions.instruments()? {
            if self.has_live_roll(&instrument)? {
                debug!(instrument = %instrument, "Roll already in flight");
                continue;
            }
            for (contract_id, position) in self.positions.contract_positions(&instrument)? {
                let contract = self.universe.contract(&contract_id).ok_or_else(|| {
                    EngineError::FatalConfiguration(format!(
                        "held contract {contract_id} of {instrument} is not configured"
                    ))
                })?;
                if !contract.in_roll_window(as_of, self.window_days) {
                    continue;
                }
                if self.has_live_contract_orders(&instrument, &contract_id)? {
                    debug!(
                        instrument = %instrument,
                        contract = %contract_id,
                        "Orders in flight for expiring contract; roll postponed"
                    );
                    continue;
                }
                let target = self.roll_target(&contract, as_of)?;
                info!(
                    instrument = %instrument,
                    from = %contract.id,
                    to = %target.id,
                    position,
                    days_to_expiry = contract.days_to_expiry(as_of),
                    "Roll due"
                );
                orders.push(NewOrder::new(
                    StrategyId::roll(),
                    instrument.clone(),
                    TradeVector::new(vec![-position, position]),
                    InstrumentDetail::roll(RollSpec {
                        from: contract.id.clone(),
                        to: target.id,
                    }),
                ));
                // One roll per instrument at a time; the key rule would
                // reject a second one anyway.
                break;
            }
        }
        Ok(orders)
    }

    fn roll_target(&self, from: &ContractSpec, as_of: NaiveDate) -> EngineResult<ContractSpec> {
        let mut candidate = self.universe.next_contract(&from.id);
        while let Some(next) = candidate {
            if !next.in_roll_window(as_of, self.window_days) {
                return Ok(next);
            }
            candidate = self.universe.next_contract(&next.id);
        }
        Err(EngineError::FatalConfiguration(format!(
            "no contract of {} to roll {} into",
            from.instrument, from.id
        )))
    }

    fn has_live_roll(&self, instrument: &InstrumentId) -> EngineResult<bool> {
        let live = self.instruments.scan(
            &OrderFilter::all()
                .instrument(instrument.clone())
                .strategy(StrategyId::roll())
                .live(),
        )?;
        Ok(!live.is_empty())
    }

    fn has_live_contract_orders(
        &self,
        instrument: &InstrumentId,
        contract: &ContractId,
    ) -> EngineResult<bool> {
        let live = self
            .contracts
            .scan(&OrderFilter::all().instrument(instrument.clone()).live())?;
        Ok(live.iter().any(|o| o.contracts().contains(contract)))
    }
}

impl std::fmt::Debug for RollManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollManager")
            .field("window_days", &self.window_days)
            .finish_non_exhaustive()
    }
}
