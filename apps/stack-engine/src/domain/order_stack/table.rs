//! Arena of orders for one stack, shared by the store backends.

use std::collections::BTreeMap;
use std::ops::Bound;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StackError;
use super::order::{NewOrder, Order, OrderKey};
use super::state::OrderState;
use super::store::{OrderFilter, OrderUpdate, RemovalCheck};
use super::tier::Tier;
use crate::domain::shared::OrderId;

/// Orders of one stack keyed by id, plus the id allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StackTable<T: Tier> {
    next_id: u64,
    orders: BTreeMap<OrderId, Order<T>>,
}

impl<T: Tier> Default for StackTable<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            orders: BTreeMap::new(),
        }
    }
}

impl<T: Tier> StackTable<T> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no orders are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn live_holder(&self, key: &OrderKey) -> Option<OrderId> {
        self.orders
            .values()
            .find(|o| o.is_live() && o.key() == *key)
            .map(|o| o.id)
    }

    /// See [`OrderStore::insert`](super::store::OrderStore::insert).
    pub fn insert(
        &mut self,
        orders: Vec<NewOrder<T>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderId>, StackError> {
        let mut keys: Vec<(OrderKey, OrderId)> = Vec::with_capacity(orders.len());
        let mut next = self.next_id;
        for order in &orders {
            order.validate()?;
            let key = order.key();
            let existing = self
                .live_holder(&key)
                .or_else(|| keys.iter().find(|(k, _)| *k == key).map(|(_, id)| *id));
            if let Some(existing) = existing {
                return Err(StackError::DuplicateOrder {
                    tier: T::NAME,
                    key: key.to_string(),
                    existing,
                });
            }
            keys.push((key, OrderId::new(next)));
            next += 1;
        }

        let ids: Vec<OrderId> = keys.into_iter().map(|(_, id)| id).collect();
        for (order, id) in orders.into_iter().zip(&ids) {
            self.orders.insert(*id, order.into_order(*id, now));
        }
        self.next_id = next;
        Ok(ids)
    }

    /// Read one order.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&Order<T>> {
        self.orders.get(&id)
    }

    /// Run `f` on a copy of the order and commit it on success.
    pub fn update(&mut self, id: OrderId, f: OrderUpdate<'_, T>) -> Result<Order<T>, StackError> {
        let stored = self
            .orders
            .get_mut(&id)
            .ok_or(StackError::NotFound { tier: T::NAME, id })?;
        let mut copy = stored.clone();
        f(&mut copy)?;
        *stored = copy.clone();
        Ok(copy)
    }

    /// Remove the order if `check` accepts it.
    pub fn remove(&mut self, id: OrderId, check: RemovalCheck<'_, T>) -> Result<Order<T>, StackError> {
        let stored = self
            .orders
            .get(&id)
            .ok_or(StackError::NotFound { tier: T::NAME, id })?;
        check(stored)?;
        self.orders
            .remove(&id)
            .ok_or(StackError::NotFound { tier: T::NAME, id })
    }

    /// First non-COMPLETED order strictly after `cursor`.
    #[must_use]
    pub fn next_unprocessed_after(&self, cursor: Option<OrderId>) -> Option<OrderId> {
        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        self.orders
            .range((lower, Bound::Unbounded))
            .find(|(_, o)| o.state != OrderState::Completed)
            .map(|(id, _)| *id)
    }

    /// Orders matching the filter, by id.
    #[must_use]
    pub fn scan(&self, filter: &OrderFilter) -> Vec<Order<T>> {
        self.orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_stack::delta::OrderDelta;
    use crate::domain::order_stack::tier::{ContractDetail, ContractTier, InstrumentDetail, InstrumentTier};
    use crate::domain::shared::{ContractId, InstrumentId, StrategyId, TradeVector};

    fn new_instrument(strategy: &str, instrument: &str, qty: i64) -> NewOrder<InstrumentTier> {
        NewOrder::new(
            StrategyId::new(strategy),
            InstrumentId::new(instrument),
            TradeVector::single(qty),
            InstrumentDetail::default(),
        )
    }

    #[test]
    fn ids_increase_in_creation_order() {
        let mut table = StackTable::<InstrumentTier>::new();
        let now = Utc::now();
        let a = table.insert(vec![new_instrument("a", "SOFR", 1)], now).unwrap();
        let b = table.insert(vec![new_instrument("b", "SOFR", 1)], now).unwrap();
        assert!(a[0] < b[0]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn duplicate_live_key_is_rejected() {
        let mut table = StackTable::<InstrumentTier>::new();
        let now = Utc::now();
        let first = table.insert(vec![new_instrument("a", "SOFR", 1)], now).unwrap();
        let err = table
            .insert(vec![new_instrument("a", "SOFR", 5)], now)
            .unwrap_err();
        match err {
            StackError::DuplicateOrder { existing, .. } => assert_eq!(existing, first[0]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cancelled_order_frees_its_key() {
        let mut table = StackTable::<InstrumentTier>::new();
        let now = Utc::now();
        let ids = table.insert(vec![new_instrument("a", "SOFR", 1)], now).unwrap();
        table
            .update(ids[0], &mut |o| o.apply(&OrderDelta::Cancel, now))
            .unwrap();
        assert!(table.insert(vec![new_instrument("a", "SOFR", 2)], now).is_ok());
    }

    #[test]
    fn group_insert_is_all_or_nothing() {
        let mut table = StackTable::<ContractTier>::new();
        let now = Utc::now();
        let leg = |contract: &str, qty: i64| {
            NewOrder::<ContractTier>::new(
                StrategyId::new("a"),
                InstrumentId::new("SOFR"),
                TradeVector::single(qty),
                ContractDetail::single(ContractId::new(contract)),
            )
        };
        table.insert(vec![leg("SOFR_20270317", 1)], now).unwrap();
        let result = table.insert(vec![leg("SOFR_20261216", -1), leg("SOFR_20270317", 1)], now);
        assert!(matches!(result, Err(StackError::DuplicateOrder { .. })));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn failed_update_leaves_order_untouched() {
        let mut table = StackTable::<InstrumentTier>::new();
        let now = Utc::now();
        let ids = table.insert(vec![new_instrument("a", "SOFR", 3)], now).unwrap();
        let result = table.update(ids[0], &mut |o| {
            o.apply(&OrderDelta::Cancel, now)?;
            o.apply(&OrderDelta::AddChildren(vec![OrderId::new(9)]), now)
        });
        assert!(result.is_err());
        assert_eq!(table.get(ids[0]).unwrap().state, OrderState::Created);
    }

    #[test]
    fn unprocessed_skips_completed() {
        let mut table = StackTable::<InstrumentTier>::new();
        let now = Utc::now();
        let ids = table
            .insert(
                vec![new_instrument("a", "SOFR", 1), new_instrument("b", "SOFR", 1)],
                now,
            )
            .unwrap();
        table
            .update(ids[0], &mut |o| {
                o.apply(&OrderDelta::Cancel, now)?;
                o.apply(&OrderDelta::Complete, now)
            })
            .unwrap();
        assert_eq!(table.next_unprocessed_after(None), Some(ids[1]));
        assert_eq!(table.next_unprocessed_after(Some(ids[1])), None);
    }

    #[test]
    fn table_round_trips_through_json() {
        let mut table = StackTable::<InstrumentTier>::new();
        table
            .insert(vec![new_instrument("a", "SOFR", 1)], Utc::now())
            .unwrap();
        let json = serde_json::to_string(&table).unwrap();
        let mut back: StackTable<InstrumentTier> = serde_json::from_str(&json).unwrap();
        let ids = back
            .insert(vec![new_instrument("b", "SOFR", 1)], Utc::now())
            .unwrap();
        assert_eq!(ids, vec![OrderId::new(2)]);
    }
}
