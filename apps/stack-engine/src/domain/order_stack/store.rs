//! Storage port for one order stack.

use chrono::{DateTime, Utc};

use super::errors::StackError;
use super::order::{NewOrder, Order};
use super::state::OrderState;
use super::tier::Tier;
use crate::domain::shared::{InstrumentId, OrderId, StrategyId};

/// Closure run against a stored order inside the store's critical section.
pub type OrderUpdate<'a, T> = &'a mut dyn FnMut(&mut Order<T>) -> Result<(), StackError>;

/// Closure deciding whether a stored order may be removed.
pub type RemovalCheck<'a, T> = &'a mut dyn FnMut(&Order<T>) -> Result<(), StackError>;

/// Durable storage for one stack, keyed by order id.
///
/// Implementations must make `insert`, `update` and `remove` atomic: either
/// the whole effect becomes visible or none of it does.
pub trait OrderStore<T: Tier>: Send + Sync {
    /// Insert all orders or none, allocating increasing ids.
    ///
    /// Fails with `DuplicateOrder` if any order's key is held by a live order
    /// already stored or earlier in the same batch.
    fn insert(
        &self,
        orders: Vec<NewOrder<T>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderId>, StackError>;

    /// Read one order.
    fn get(&self, id: OrderId) -> Result<Option<Order<T>>, StackError>;

    /// Atomic read-modify-write of one order.
    ///
    /// The closure runs on a copy; the copy replaces the stored order only if
    /// the closure returns `Ok`. Returns the stored result.
    fn update(&self, id: OrderId, f: OrderUpdate<'_, T>) -> Result<Order<T>, StackError>;

    /// Remove one order if `check` accepts it.
    fn remove(&self, id: OrderId, check: RemovalCheck<'_, T>) -> Result<Order<T>, StackError>;

    /// First order after `cursor` (by id) that is not COMPLETED.
    fn next_unprocessed_after(&self, cursor: Option<OrderId>)
    -> Result<Option<OrderId>, StackError>;

    /// Orders matching `filter`, ordered by id.
    fn scan(&self, filter: &OrderFilter) -> Result<Vec<Order<T>>, StackError>;
}

/// Range-scan filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Only orders for this instrument.
    pub instrument: Option<InstrumentId>,
    /// Only orders for this strategy.
    pub strategy: Option<StrategyId>,
    /// Only orders in one of these states.
    pub states: Option<Vec<OrderState>>,
    /// Only children of this parent.
    pub parent: Option<OrderId>,
}

impl OrderFilter {
    /// Match every order.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to an instrument.
    #[must_use]
    pub fn instrument(mut self, instrument: InstrumentId) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// Restrict to a strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: StrategyId) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Restrict to a set of states.
    #[must_use]
    pub fn states(mut self, states: &[OrderState]) -> Self {
        self.states = Some(states.to_vec());
        self
    }

    /// Restrict to live orders.
    #[must_use]
    pub fn live(self) -> Self {
        self.states(&[
            OrderState::Created,
            OrderState::Locked,
            OrderState::PartiallyFilled,
            OrderState::Filled,
        ])
    }

    /// Restrict to children of `parent`.
    #[must_use]
    pub const fn parent(mut self, parent: OrderId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether `order` passes the filter.
    #[must_use]
    pub fn matches<T: Tier>(&self, order: &Order<T>) -> bool {
        self.instrument
            .as_ref()
            .is_none_or(|i| *i == order.instrument_id)
            && self
                .strategy
                .as_ref()
                .is_none_or(|s| *s == order.strategy_id)
            && self
                .states
                .as_ref()
                .is_none_or(|states| states.contains(&order.state))
            && self.parent.is_none_or(|p| order.parent == Some(p))
    }
}
