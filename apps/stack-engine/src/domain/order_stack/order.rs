//! The order shape shared by all three stacks.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delta::{OrderDelta, SubmissionDelta};
use super::errors::StackError;
use super::state::{OrderState, OrderStateMachine};
use super::tier::Tier;
use crate::domain::shared::{ContractId, HolderId, InstrumentId, OrderId, StrategyId, TradeVector};

// ============================================================================
// Lock token
// ============================================================================

/// Proof that a holder owns an order's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// Unique token value.
    pub token: Uuid,
    /// Locked order.
    pub order_id: OrderId,
    /// Process holding the lock.
    pub holder: HolderId,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockToken {
    /// Issue a fresh token.
    #[must_use]
    pub fn issue(order_id: OrderId, holder: HolderId, acquired_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            order_id,
            holder,
            acquired_at,
        }
    }

    /// Whether the lock is older than `max_age` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.acquired_at > max_age
    }
}

// ============================================================================
// Order key
// ============================================================================

/// Uniqueness key: at most one live order per key in a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey {
    /// Owning strategy.
    pub strategy: StrategyId,
    /// Instrument traded.
    pub instrument: InstrumentId,
    /// Contracts traded; empty on the instrument stack.
    pub contracts: Vec<ContractId>,
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy, self.instrument)?;
        for contract in &self.contracts {
            write!(f, "/{contract}")?;
        }
        Ok(())
    }
}

// ============================================================================
// New order
// ============================================================================

/// An order not yet stored. The store assigns id, state and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder<T: Tier> {
    /// Owning strategy.
    pub strategy_id: StrategyId,
    /// Instrument traded.
    pub instrument_id: InstrumentId,
    /// Requested quantity per leg.
    pub trade: TradeVector,
    /// Parent order in the tier above.
    pub parent: Option<OrderId>,
    /// Tier detail.
    pub detail: T::Detail,
}

impl<T: Tier> NewOrder<T> {
    /// Build a new order.
    #[must_use]
    pub fn new(
        strategy_id: StrategyId,
        instrument_id: InstrumentId,
        trade: TradeVector,
        detail: T::Detail,
    ) -> Self {
        Self {
            strategy_id,
            instrument_id,
            trade,
            parent: None,
            detail,
        }
    }

    /// Set the parent order.
    #[must_use]
    pub fn with_parent(mut self, parent: OrderId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Uniqueness key of the order.
    #[must_use]
    pub fn key(&self) -> OrderKey {
        OrderKey {
            strategy: self.strategy_id.clone(),
            instrument: self.instrument_id.clone(),
            contracts: T::contracts(&self.detail).to_vec(),
        }
    }

    /// Structural checks applied before the order is stored.
    pub fn validate(&self) -> Result<(), StackError> {
        if self.trade.is_empty() || self.trade.is_zero() {
            return Err(StackError::InvalidOrder(format!(
                "{} order for {} has a zero trade",
                T::NAME,
                self.instrument_id
            )));
        }
        let contracts = T::contracts(&self.detail);
        if !contracts.is_empty() && contracts.len() != self.trade.len() {
            return Err(StackError::InvalidOrder(format!(
                "{} order for {} has {} legs but {} contracts",
                T::NAME,
                self.instrument_id,
                self.trade.len(),
                contracts.len()
            )));
        }
        Ok(())
    }

    /// Turn into a stored order with the allocated id.
    #[must_use]
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order<T> {
        let fill = TradeVector::zeros(self.trade.len());
        Order {
            id,
            strategy_id: self.strategy_id,
            instrument_id: self.instrument_id,
            trade: self.trade,
            fill,
            avg_price: None,
            parent: self.parent,
            children: Vec::new(),
            state: OrderState::Created,
            lock: None,
            detail: self.detail,
            created_at: now,
            modified_at: now,
            completed_at: None,
            tier: PhantomData,
        }
    }
}

// ============================================================================
// Order
// ============================================================================

/// An order in one of the three stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Order<T: Tier> {
    /// Unique, immutable id.
    pub id: OrderId,
    /// Owning strategy.
    pub strategy_id: StrategyId,
    /// Instrument traded.
    pub instrument_id: InstrumentId,
    /// Requested quantity per leg.
    pub trade: TradeVector,
    /// Executed quantity per leg.
    pub fill: TradeVector,
    /// Volume-weighted average fill price.
    pub avg_price: Option<Decimal>,
    /// Parent order in the tier above.
    pub parent: Option<OrderId>,
    /// Children in the tier below, in creation order.
    pub children: Vec<OrderId>,
    /// Lifecycle state.
    pub state: OrderState,
    /// Present only while a holder owns the lock.
    pub lock: Option<LockToken>,
    /// Tier detail.
    pub detail: T::Detail,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub modified_at: DateTime<Utc>,
    /// When the order completed.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    tier: PhantomData<T>,
}

impl<T: Tier> Order<T> {
    /// Uniqueness key of the order.
    #[must_use]
    pub fn key(&self) -> OrderKey {
        OrderKey {
            strategy: self.strategy_id.clone(),
            instrument: self.instrument_id.clone(),
            contracts: self.contracts().to_vec(),
        }
    }

    /// Contracts traded, one per leg. Empty for instrument orders.
    #[must_use]
    pub fn contracts(&self) -> &[ContractId] {
        T::contracts(&self.detail)
    }

    /// Quantity still open, per leg.
    #[must_use]
    pub fn remaining(&self) -> TradeVector {
        self.trade.remaining(&self.fill)
    }

    /// Whether the whole trade has been filled.
    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.trade.is_filled_by(&self.fill)
    }

    /// Whether the order counts towards the duplicate-key rule.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Whether the order is locked.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Whether `token` holds this order's lock.
    #[must_use]
    pub fn is_locked_by(&self, token: &LockToken) -> bool {
        self.lock
            .as_ref()
            .is_some_and(|held| held.token == token.token && held.order_id == self.id)
    }

    /// Fail unless `token` holds the lock.
    pub fn ensure_locked_by(&self, token: &LockToken) -> Result<(), StackError> {
        if self.is_locked_by(token) {
            Ok(())
        } else {
            Err(StackError::LockMismatch { id: self.id })
        }
    }

    fn transition(&mut self, to: OrderState) -> Result<(), StackError> {
        if self.state == to {
            return Ok(());
        }
        if !OrderStateMachine::is_valid_transition(self.state, to) {
            return Err(StackError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    fn state_for_fill(&self) -> OrderState {
        if self.is_fully_filled() {
            OrderState::Filled
        } else if self.fill.is_zero() {
            self.state
        } else {
            OrderState::PartiallyFilled
        }
    }

    /// Apply a delta.
    ///
    /// Lock ownership is checked by the stack. On error the order may be
    /// partially mutated; stores apply deltas to a copy and discard it.
    pub fn apply(&mut self, delta: &OrderDelta, now: DateTime<Utc>) -> Result<(), StackError> {
        match delta {
            OrderDelta::Fill { fill, price } => self.apply_fill(fill, *price)?,
            OrderDelta::SetFill { fill, avg_price } => self.apply_set_fill(fill, *avg_price)?,
            OrderDelta::Cancel => {
                if self.state != OrderState::Cancelled {
                    self.transition(OrderState::Cancelled)?;
                }
            }
            OrderDelta::AddChildren(ids) => {
                if self.state.is_resolved() {
                    return Err(StackError::InvalidDelta {
                        id: self.id,
                        reason: format!("cannot add children in state {}", self.state),
                    });
                }
                for child in ids {
                    if !self.children.contains(child) {
                        self.children.push(*child);
                    }
                }
                if self.state == OrderState::Created {
                    self.transition(OrderState::Locked)?;
                }
            }
            OrderDelta::Complete => {
                self.transition(OrderState::Completed)?;
                self.completed_at = Some(now);
            }
            OrderDelta::Submission(submission) => {
                if matches!(submission, SubmissionDelta::Reserve) && self.state != OrderState::Created
                {
                    return Err(StackError::InvalidDelta {
                        id: self.id,
                        reason: format!("cannot reserve in state {}", self.state),
                    });
                }
                T::apply_submission(self.id, &mut self.detail, submission, now)?;
                match submission {
                    SubmissionDelta::Submitted { .. } if self.state == OrderState::Created => {
                        self.transition(OrderState::Locked)?;
                    }
                    SubmissionDelta::Rejected { .. } => self.transition(OrderState::Cancelled)?,
                    _ => {}
                }
            }
        }
        self.modified_at = now;
        Ok(())
    }

    fn apply_fill(&mut self, fill: &TradeVector, price: Option<Decimal>) -> Result<(), StackError> {
        let cancelled = self.state == OrderState::Cancelled;
        if !self.state.can_fill() && !cancelled {
            return Err(StackError::InvalidDelta {
                id: self.id,
                reason: format!("cannot fill in state {}", self.state),
            });
        }
        let total = self.fill.add(fill);
        self.trade
            .check_fill(&total)
            .map_err(|source| StackError::OverFill {
                id: self.id,
                source,
            })?;
        self.avg_price = weighted_price(
            self.avg_price,
            self.fill.total_abs(),
            price,
            fill.total_abs(),
        );
        self.fill = total;
        if cancelled {
            // Executed before the cancel took effect.
            return Ok(());
        }
        let next = self.state_for_fill();
        self.transition(next)
    }

    fn apply_set_fill(
        &mut self,
        fill: &TradeVector,
        avg_price: Option<Decimal>,
    ) -> Result<(), StackError> {
        self.trade
            .check_fill(fill)
            .map_err(|source| StackError::OverFill {
                id: self.id,
                source,
            })?;
        if *fill == self.fill {
            if avg_price.is_some() {
                self.avg_price = avg_price;
            }
            return Ok(());
        }
        match self.state {
            OrderState::Cancelled => {
                self.fill = fill.clone();
                self.avg_price = avg_price;
                Ok(())
            }
            state if state.can_fill() => {
                self.fill = fill.clone();
                self.avg_price = avg_price;
                let next = self.state_for_fill();
                self.transition(next)
            }
            state => Err(StackError::InvalidDelta {
                id: self.id,
                reason: format!("cannot change fill {} to {fill} in state {state}", self.fill),
            }),
        }
    }
}

/// Volume-weighted combination of two average prices.
#[must_use]
pub fn weighted_price(
    current: Option<Decimal>,
    current_qty: i64,
    incoming: Option<Decimal>,
    incoming_qty: i64,
) -> Option<Decimal> {
    match (current, incoming) {
        (Some(a), Some(b)) => {
            let total = current_qty + incoming_qty;
            if total == 0 {
                return Some(b);
            }
            Some(
                (a * Decimal::from(current_qty) + b * Decimal::from(incoming_qty))
                    / Decimal::from(total),
            )
        }
        (current, incoming) => current.or(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_stack::tier::{BrokerDetail, BrokerTier, ExecutionAlgo, InstrumentDetail, InstrumentTier};
    use crate::domain::shared::{BrokerRef, FillBoundError};
    use rust_decimal_macros::dec;

    fn instrument_order(qty: i64) -> Order<InstrumentTier> {
        NewOrder::<InstrumentTier>::new(
            StrategyId::new("trend"),
            InstrumentId::new("SOFR"),
            TradeVector::single(qty),
            InstrumentDetail::default(),
        )
        .into_order(OrderId::new(1), Utc::now())
    }

    fn broker_order(qty: i64) -> Order<BrokerTier> {
        NewOrder::<BrokerTier>::new(
            StrategyId::new("trend"),
            InstrumentId::new("SOFR"),
            TradeVector::single(qty),
            BrokerDetail::new(vec![ContractId::new("SOFR_20261216")], ExecutionAlgo::Market),
        )
        .with_parent(OrderId::new(4))
        .into_order(OrderId::new(7), Utc::now())
    }

    fn fill(qty: i64, price: Decimal) -> OrderDelta {
        OrderDelta::Fill {
            fill: TradeVector::single(qty),
            price: Some(price),
        }
    }

    #[test]
    fn new_order_starts_created_with_zero_fill() {
        let order = instrument_order(10);
        assert_eq!(order.state, OrderState::Created);
        assert_eq!(order.fill, TradeVector::single(0));
        assert!(!order.is_locked());
        assert!(order.key().contracts.is_empty());
    }

    #[test]
    fn zero_trade_is_invalid() {
        let new = NewOrder::<InstrumentTier>::new(
            StrategyId::new("trend"),
            InstrumentId::new("SOFR"),
            TradeVector::single(0),
            InstrumentDetail::default(),
        );
        assert!(matches!(new.validate(), Err(StackError::InvalidOrder(_))));
    }

    #[test]
    fn leg_count_must_match_contracts() {
        let new = NewOrder::<BrokerTier>::new(
            StrategyId::new("trend"),
            InstrumentId::new("SOFR"),
            TradeVector::new(vec![1, -1]),
            BrokerDetail::new(vec![ContractId::new("SOFR_20261216")], ExecutionAlgo::Market),
        );
        assert!(matches!(new.validate(), Err(StackError::InvalidOrder(_))));
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = broker_order(10);
        let now = Utc::now();
        order.apply(&fill(6, dec!(100)), now).unwrap();
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.fill, TradeVector::single(6));

        order.apply(&fill(4, dec!(105)), now).unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_price, Some(dec!(102)));
    }

    #[test]
    fn over_fill_is_rejected_without_change() {
        let mut order = broker_order(10);
        let now = Utc::now();
        order.apply(&fill(6, dec!(100)), now).unwrap();
        let mut attempt = order.clone();
        let err = attempt.apply(&fill(5, dec!(100)), now).unwrap_err();
        assert!(matches!(
            err,
            StackError::OverFill {
                source: FillBoundError::Exceeds { .. },
                ..
            }
        ));
        assert_eq!(order.fill, TradeVector::single(6));
    }

    #[test]
    fn wrong_sign_fill_is_rejected() {
        let mut order = broker_order(-3);
        let err = order.apply(&fill(1, dec!(100)), Utc::now()).unwrap_err();
        assert!(matches!(err, StackError::OverFill { .. }));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut order = instrument_order(5);
        order.apply(&OrderDelta::Cancel, Utc::now()).unwrap();
        order.apply(&OrderDelta::Cancel, Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
    }

    #[test]
    fn cannot_cancel_filled_order() {
        let mut order = broker_order(2);
        order.apply(&fill(2, dec!(99)), Utc::now()).unwrap();
        let err = order.apply(&OrderDelta::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(err, StackError::InvalidTransition { .. }));
    }

    #[test]
    fn adding_children_takes_order_up() {
        let mut order = instrument_order(5);
        order
            .apply(&OrderDelta::AddChildren(vec![OrderId::new(3)]), Utc::now())
            .unwrap();
        order
            .apply(&OrderDelta::AddChildren(vec![OrderId::new(3)]), Utc::now())
            .unwrap();
        assert_eq!(order.state, OrderState::Locked);
        assert_eq!(order.children, vec![OrderId::new(3)]);
    }

    #[test]
    fn complete_requires_resolved_trade() {
        let mut order = instrument_order(5);
        let err = order.apply(&OrderDelta::Complete, Utc::now()).unwrap_err();
        assert!(matches!(err, StackError::InvalidTransition { .. }));

        order.apply(&OrderDelta::Cancel, Utc::now()).unwrap();
        order.apply(&OrderDelta::Complete, Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Completed);
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn set_fill_rederives_parent_state() {
        let mut order = instrument_order(10);
        order
            .apply(
                &OrderDelta::SetFill {
                    fill: TradeVector::single(10),
                    avg_price: Some(dec!(101)),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_price, Some(dec!(101)));
    }

    #[test]
    fn set_fill_on_cancelled_order_keeps_state() {
        let mut order = instrument_order(10);
        order.apply(&OrderDelta::Cancel, Utc::now()).unwrap();
        order
            .apply(
                &OrderDelta::SetFill {
                    fill: TradeVector::single(4),
                    avg_price: None,
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.fill, TradeVector::single(4));
    }

    #[test]
    fn submitted_broker_order_is_locked_state() {
        let mut order = broker_order(3);
        let now = Utc::now();
        order
            .apply(&OrderDelta::Submission(SubmissionDelta::Reserve), now)
            .unwrap();
        order
            .apply(
                &OrderDelta::Submission(SubmissionDelta::Submitted {
                    broker_ref: BrokerRef::new("paper-9"),
                }),
                now,
            )
            .unwrap();
        assert_eq!(order.state, OrderState::Locked);
    }

    #[test]
    fn rejection_cancels_broker_order() {
        let mut order = broker_order(3);
        let now = Utc::now();
        order
            .apply(&OrderDelta::Submission(SubmissionDelta::Reserve), now)
            .unwrap();
        order
            .apply(
                &OrderDelta::Submission(SubmissionDelta::Rejected {
                    reason: "margin".into(),
                }),
                now,
            )
            .unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.detail.submission.rejection.as_deref(), Some("margin"));
        assert!(order.detail.submission.reserved_at.is_none());
    }

    #[test]
    fn late_fill_on_cancelled_order_is_kept() {
        let mut order = broker_order(10);
        order.apply(&OrderDelta::Cancel, Utc::now()).unwrap();
        order.apply(&fill(4, dec!(100)), Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.fill, TradeVector::single(4));
    }

    #[test]
    fn weighted_price_combines_by_quantity() {
        assert_eq!(weighted_price(None, 0, Some(dec!(5)), 2), Some(dec!(5)));
        assert_eq!(
            weighted_price(Some(dec!(10)), 1, Some(dec!(20)), 3),
            Some(dec!(17.5))
        );
        assert_eq!(weighted_price(Some(dec!(10)), 4, None, 0), Some(dec!(10)));
    }

    #[test]
    fn order_round_trips_through_json() {
        let order = broker_order(3);
        let json = serde_json::to_string(&order).unwrap();
        let back: Order<BrokerTier> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn stale_lock_detection() {
        let now = Utc::now();
        let token = LockToken::issue(
            OrderId::new(1),
            HolderId::new("h"),
            now - chrono::Duration::seconds(120),
        );
        assert!(token.is_stale(now, chrono::Duration::seconds(60)));
        assert!(!token.is_stale(now, chrono::Duration::seconds(600)));
    }
}
