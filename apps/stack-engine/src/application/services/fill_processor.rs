//! Execution report ingestion and bottom-up fill propagation.
//!
//! A report updates its broker order first. The parent contract order's
//! fill is then re-derived as the sum of its broker children, and the
//! instrument order's fill as the sum of its contract children. Parents
//! are never incremented directly, so re-running a propagation is harmless.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::lock_manager::LockManager;
use crate::application::ports::{Alert, AlertKind, AlertPort, ExecutionReport};
use crate::domain::order_stack::order::weighted_price;
use crate::domain::order_stack::{
    BrokerOrder, BrokerStack, ContractOrder, ContractStack, InstrumentOrder, InstrumentStack,
    LockToken, OrderDelta, OrderState, RollLeg, StackError,
};
use crate::domain::shared::{OrderId, TradeVector};
use crate::error::EngineResult;
use crate::observability::{record_alert, record_fill};

/// Result of applying one execution report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillOutcome {
    /// Broker order the report applied to.
    pub order_id: OrderId,
    /// Quantity actually applied after capping.
    pub applied: TradeVector,
    /// Whether the report exceeded the open quantity and was capped.
    pub capped: bool,
    /// Whether both parent aggregates were updated. `false` means a parent
    /// was locked elsewhere and the completion sweep will catch up.
    pub propagated: bool,
}

/// Applies execution reports to the stacks.
#[derive(Clone)]
pub struct FillProcessor {
    instruments: InstrumentStack,
    contracts: ContractStack,
    brokers: BrokerStack,
    locks: LockManager,
    alerts: Arc<dyn AlertPort>,
}

impl FillProcessor {
    /// Create a fill processor.
    #[must_use]
    pub fn new(
        instruments: InstrumentStack,
        contracts: ContractStack,
        brokers: BrokerStack,
        locks: LockManager,
        alerts: Arc<dyn AlertPort>,
    ) -> Self {
        Self {
            instruments,
            contracts,
            brokers,
            locks,
            alerts,
        }
    }

    /// Apply a report identified by broker reference.
    ///
    /// Returns `None` if no broker order carries the reference yet, which
    /// happens when a fill is polled before the submitting process has
    /// confirmed the submission.
    pub async fn apply_report(&self, report: &ExecutionReport) -> EngineResult<Option<FillOutcome>> {
        let Some(order) = self.brokers.find_by_broker_ref(&report.broker_ref)? else {
            return Ok(None);
        };
        self.apply_execution_report(order.id, &report.filled, report.avg_price)
            .await
            .map(Some)
    }

    /// Apply an incremental fill to a broker order and propagate it upward.
    ///
    /// A fill larger than the open quantity is capped to it and alerted as
    /// an over-fill; the excess is never dropped silently.
    pub async fn apply_execution_report(
        &self,
        broker_order_id: OrderId,
        filled: &TradeVector,
        avg_price: Option<Decimal>,
    ) -> EngineResult<FillOutcome> {
        let token = self.locks.acquire(&self.brokers, broker_order_id).await?;
        let result = self.fill_locked(broker_order_id, &token, filled, avg_price);
        let released = self.locks.release(&self.brokers, &token);
        let (order, applied, capped) = result?;
        released?;

        record_fill(capped);
        if capped {
            let excess = filled.remaining(&applied);
            warn!(
                order_id = %broker_order_id,
                reported = %filled,
                applied = %applied,
                excess = %excess,
                "Execution report exceeds open quantity; capped"
            );
            self.raise(
                Alert::new(
                    AlertKind::OverFill,
                    format!(
                        "broker order {broker_order_id}: reported {filled}, applied {applied}, \
                         trade {}",
                        order.trade
                    ),
                )
                .with_instrument(order.instrument_id.clone())
                .with_order(broker_order_id),
            )
            .await;
        } else {
            info!(
                order_id = %broker_order_id,
                applied = %applied,
                fill = %order.fill,
                state = %order.state,
                "Fill applied"
            );
        }

        let propagated = match order.parent {
            Some(contract_id) => self.propagate_from_contract(contract_id).await?,
            None => true,
        };

        Ok(FillOutcome {
            order_id: broker_order_id,
            applied,
            capped,
            propagated,
        })
    }

    fn fill_locked(
        &self,
        id: OrderId,
        token: &LockToken,
        filled: &TradeVector,
        avg_price: Option<Decimal>,
    ) -> Result<(BrokerOrder, TradeVector, bool), StackError> {
        let order = self.brokers.get(id)?;
        let (applied, capped) = if order.state.can_fill() || order.state == OrderState::Cancelled {
            let total = order.fill.add(filled);
            match order.trade.check_fill(&total) {
                Ok(()) => (filled.clone(), false),
                _ => (order.trade.clamp_fill(&total).remaining(&order.fill), true),
            }
        } else {
            (TradeVector::zeros(order.trade.len()), !filled.is_zero())
        };
        if applied.is_zero() {
            return Ok((order, applied, capped));
        }
        let updated = self.brokers.modify(
            id,
            token,
            &OrderDelta::Fill {
                fill: applied.clone(),
                price: avg_price,
            },
        )?;
        Ok((updated, applied, capped))
    }

    /// Re-derive a contract order and then its instrument order.
    ///
    /// Returns `false` if either was locked by another holder.
    pub async fn propagate_from_contract(&self, contract_id: OrderId) -> EngineResult<bool> {
        let parent = match self.rederive_contract(contract_id).await {
            Ok(parent) => parent,
            Err(StackError::LockConflict { .. }) => {
                debug!(order_id = %contract_id, "Contract order locked; propagation deferred");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(instrument_id) = parent else {
            return Ok(true);
        };
        match self.rederive_instrument(instrument_id).await {
            Ok(()) => Ok(true),
            Err(StackError::LockConflict { .. }) => {
                debug!(order_id = %instrument_id, "Instrument order locked; propagation deferred");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Set a contract order's fill to the sum of its broker children.
    /// Returns the contract order's parent.
    pub async fn rederive_contract(&self, contract_id: OrderId) -> Result<Option<OrderId>, StackError> {
        self.locks
            .with_lock(&self.contracts, contract_id, |token| {
                let contract = self.contracts.get(contract_id)?;
                if contract.state == OrderState::Completed {
                    return Ok(contract.parent);
                }
                let children = self.brokers.children_of(contract_id)?;
                let (fill, avg_price) = aggregate_broker_fills(&contract, &children);
                if fill != contract.fill || avg_price != contract.avg_price {
                    self.contracts
                        .modify(contract_id, token, &OrderDelta::SetFill { fill, avg_price })?;
                }
                Ok(contract.parent)
            })
            .await
    }

    /// Set an instrument order's fill to the sum of its contract children.
    pub async fn rederive_instrument(&self, instrument_id: OrderId) -> Result<(), StackError> {
        self.locks
            .with_lock(&self.instruments, instrument_id, |token| {
                let instrument = self.instruments.get(instrument_id)?;
                if instrument.state == OrderState::Completed {
                    return Ok(());
                }
                let children = self.contracts.children_of(instrument_id)?;
                let (fill, avg_price) = aggregate_contract_fills(&instrument, &children);
                if fill != instrument.fill || avg_price != instrument.avg_price {
                    self.instruments.modify(
                        instrument_id,
                        token,
                        &OrderDelta::SetFill { fill, avg_price },
                    )?;
                }
                Ok(())
            })
            .await
    }

    async fn raise(&self, alert: Alert) {
        record_alert(alert.kind.as_str());
        if let Err(e) = self.alerts.raise(alert).await {
            warn!(error = %e, "Failed to deliver alert");
        }
    }
}

impl std::fmt::Debug for FillProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillProcessor")
            .field("holder", self.locks.holder())
            .finish_non_exhaustive()
    }
}

/// Sum of broker children's fills, shaped like the contract order.
#[must_use]
pub fn aggregate_broker_fills(
    contract: &ContractOrder,
    children: &[BrokerOrder],
) -> (TradeVector, Option<Decimal>) {
    let mut fill = TradeVector::zeros(contract.trade.len());
    let mut price = None;
    let mut qty = 0;
    for child in children {
        let child_qty = child.fill.total_abs();
        price = weighted_price(price, qty, child.avg_price, child_qty);
        qty += child_qty;
        fill = fill.add(&child.fill);
    }
    (fill, price)
}

/// Sum of contract children's fills, shaped like the instrument order.
///
/// Roll orders have two legs: the closing child maps to the first and the
/// opening child to the second.
#[must_use]
pub fn aggregate_contract_fills(
    instrument: &InstrumentOrder,
    children: &[ContractOrder],
) -> (TradeVector, Option<Decimal>) {
    let mut legs = vec![0_i64; instrument.trade.len()];
    let mut price = None;
    let mut qty = 0;
    for child in children {
        let leg = if instrument.trade.len() > 1 && child.detail.roll_leg == Some(RollLeg::Open) {
            1
        } else {
            0
        };
        if let Some(slot) = legs.get_mut(leg) {
            *slot += child.fill.net();
        }
        let child_qty = child.fill.total_abs();
        price = weighted_price(price, qty, child.avg_price, child_qty);
        qty += child_qty;
    }
    (TradeVector::new(legs), price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoOpAlertSink;
    use crate::config::LockConfig;
    use crate::domain::order_stack::{
        BrokerDetail, ContractDetail, ExecutionAlgo, InstrumentDetail, NewOrder, OrderStack,
    };
    use crate::domain::shared::{ContractId, HolderId, InstrumentId, StrategyId};
    use crate::infrastructure::persistence::InMemoryOrderStore;
    use rust_decimal_macros::dec;

    struct Family {
        processor: FillProcessor,
        instruments: InstrumentStack,
        contracts: ContractStack,
        brokers: BrokerStack,
        instrument: OrderId,
        contract: OrderId,
        broker: OrderId,
    }

    fn family(qty: i64) -> Family {
        let instruments = OrderStack::new(Arc::new(InMemoryOrderStore::new()));
        let contracts = OrderStack::new(Arc::new(InMemoryOrderStore::new()));
        let brokers = OrderStack::new(Arc::new(InMemoryOrderStore::new()));
        let contract_id = ContractId::new("SOFR_20261216");
        let strategy = StrategyId::new("trend");
        let sofr = InstrumentId::new("SOFR");

        let instrument = instruments
            .create(NewOrder::new(
                strategy.clone(),
                sofr.clone(),
                TradeVector::single(qty),
                InstrumentDetail::default(),
            ))
            .unwrap();
        let contract = contracts
            .create(
                NewOrder::new(
                    strategy.clone(),
                    sofr.clone(),
                    TradeVector::single(qty),
                    ContractDetail::single(contract_id.clone()),
                )
                .with_parent(instrument),
            )
            .unwrap();
        let broker = brokers
            .create(
                NewOrder::new(
                    strategy,
                    sofr,
                    TradeVector::single(qty),
                    BrokerDetail::new(vec![contract_id], ExecutionAlgo::Market),
                )
                .with_parent(contract),
            )
            .unwrap();

        let locks = LockManager::new(HolderId::new("fills"), &LockConfig::default());
        let processor = FillProcessor::new(
            instruments.clone(),
            contracts.clone(),
            brokers.clone(),
            locks,
            Arc::new(NoOpAlertSink),
        );
        Family {
            processor,
            instruments,
            contracts,
            brokers,
            instrument,
            contract,
            broker,
        }
    }

    #[tokio::test]
    async fn fill_propagates_to_every_tier() {
        let f = family(10);
        let outcome = f
            .processor
            .apply_execution_report(f.broker, &TradeVector::single(10), Some(dec!(99.5)))
            .await
            .unwrap();
        assert!(!outcome.capped);
        assert!(outcome.propagated);
        assert_eq!(f.brokers.get(f.broker).unwrap().state, OrderState::Filled);
        assert_eq!(f.contracts.get(f.contract).unwrap().state, OrderState::Filled);
        let instrument = f.instruments.get(f.instrument).unwrap();
        assert_eq!(instrument.state, OrderState::Filled);
        assert_eq!(instrument.avg_price, Some(dec!(99.5)));
    }

    #[tokio::test]
    async fn over_fill_is_capped() {
        let f = family(10);
        f.processor
            .apply_execution_report(f.broker, &TradeVector::single(6), None)
            .await
            .unwrap();
        let outcome = f
            .processor
            .apply_execution_report(f.broker, &TradeVector::single(7), None)
            .await
            .unwrap();
        assert!(outcome.capped);
        assert_eq!(outcome.applied, TradeVector::single(4));
        assert_eq!(f.brokers.get(f.broker).unwrap().fill, TradeVector::single(10));
        assert_eq!(f.instruments.get(f.instrument).unwrap().fill, TradeVector::single(10));
    }

    #[tokio::test]
    async fn locked_parent_defers_propagation() {
        let f = family(10);
        let foreign = f.contracts.lock(f.contract, &HolderId::new("other")).unwrap();
        let outcome = f
            .processor
            .apply_execution_report(f.broker, &TradeVector::single(4), None)
            .await
            .unwrap();
        assert!(!outcome.propagated);
        assert_eq!(f.brokers.get(f.broker).unwrap().fill, TradeVector::single(4));
        assert_eq!(f.contracts.get(f.contract).unwrap().fill, TradeVector::single(0));

        f.contracts.unlock(f.contract, &foreign).unwrap();
        assert!(f.processor.propagate_from_contract(f.contract).await.unwrap());
        assert_eq!(f.contracts.get(f.contract).unwrap().fill, TradeVector::single(4));
        assert_eq!(
            f.instruments.get(f.instrument).unwrap().state,
            OrderState::PartiallyFilled
        );
    }

    #[test]
    fn roll_children_map_to_their_legs() {
        let now = chrono::Utc::now();
        let roll = NewOrder::<crate::domain::order_stack::InstrumentTier>::new(
            StrategyId::roll(),
            InstrumentId::new("SOFR"),
            TradeVector::new(vec![-3, 3]),
            InstrumentDetail::default(),
        )
        .into_order(OrderId::new(1), now);
        let leg = |id: u64, contract: &str, qty: i64, roll_leg: RollLeg| {
            let mut order = NewOrder::<crate::domain::order_stack::ContractTier>::new(
                StrategyId::roll(),
                InstrumentId::new("SOFR"),
                TradeVector::single(qty),
                ContractDetail {
                    legs: vec![ContractId::new(contract)],
                    roll_leg: Some(roll_leg),
                },
            )
            .into_order(OrderId::new(id), now);
            order.fill = TradeVector::single(qty);
            order
        };
        let children = vec![
            leg(1, "SOFR_20261216", -3, RollLeg::Close),
            leg(2, "SOFR_20270317", 2, RollLeg::Open),
        ];
        let (fill, _) = aggregate_contract_fills(&roll, &children);
        assert_eq!(fill, TradeVector::new(vec![-3, 2]));
    }
}
