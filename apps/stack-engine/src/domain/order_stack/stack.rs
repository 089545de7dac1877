//! Lock-guarded access to one order stack.
//!
//! `OrderStack<T>` is the only way the rest of the engine touches stored
//! orders. Every mutation is a single atomic store update that first checks
//! the caller's lock token.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::delta::OrderDelta;
use super::errors::StackError;
use super::order::{LockToken, NewOrder, Order};
use super::state::OrderState;
use super::store::{OrderFilter, OrderStore};
use super::tier::{BrokerTier, Tier};
use crate::domain::shared::{BrokerRef, HolderId, OrderId};

/// One tier of the order stack.
pub struct OrderStack<T: Tier> {
    store: Arc<dyn OrderStore<T>>,
}

impl<T: Tier> Clone for OrderStack<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: Tier> std::fmt::Debug for OrderStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStack").field("tier", &T::NAME).finish()
    }
}

impl<T: Tier> OrderStack<T> {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore<T>>) -> Self {
        Self { store }
    }

    /// Tier name.
    #[must_use]
    pub const fn tier(&self) -> &'static str {
        T::NAME
    }

    /// Create an order.
    ///
    /// # Errors
    ///
    /// `DuplicateOrder` if a live order with the same key exists,
    /// `InvalidOrder` for zero or malformed trades.
    pub fn create(&self, order: NewOrder<T>) -> Result<OrderId, StackError> {
        let ids = self.create_group(vec![order])?;
        ids.into_iter().next().ok_or_else(|| {
            StackError::InvalidOrder(format!("{} store returned no id", T::NAME))
        })
    }

    /// Create several orders atomically: all of them or none.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), for any order of the group.
    pub fn create_group(&self, orders: Vec<NewOrder<T>>) -> Result<Vec<OrderId>, StackError> {
        let ids = self.store.insert(orders, Utc::now())?;
        debug!(tier = T::NAME, ids = ?ids, "Orders created");
        Ok(ids)
    }

    /// Read one order.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such order exists.
    pub fn get(&self, id: OrderId) -> Result<Order<T>, StackError> {
        self.store
            .get(id)?
            .ok_or(StackError::NotFound { tier: T::NAME, id })
    }

    /// Read one order if it exists.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn find(&self, id: OrderId) -> Result<Option<Order<T>>, StackError> {
        self.store.get(id)
    }

    /// Lazy sequence of ids not yet COMPLETED, oldest first.
    #[must_use]
    pub fn list_unprocessed(&self) -> UnprocessedOrders<T> {
        UnprocessedOrders {
            store: Arc::clone(&self.store),
            cursor: None,
            done: false,
        }
    }

    /// Orders matching a filter, oldest first.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn scan(&self, filter: &OrderFilter) -> Result<Vec<Order<T>>, StackError> {
        self.store.scan(filter)
    }

    /// Children of `parent` in this stack, in creation order.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn children_of(&self, parent: OrderId) -> Result<Vec<Order<T>>, StackError> {
        self.store.scan(&OrderFilter::all().parent(parent))
    }

    /// Take the order's lock without waiting.
    ///
    /// # Errors
    ///
    /// `LockConflict` if any holder, including `holder` itself, holds it.
    pub fn lock(&self, id: OrderId, holder: &HolderId) -> Result<LockToken, StackError> {
        self.try_lock(id, holder, None)
    }

    /// Take the order's lock, breaking a lock older than `stale_after`.
    ///
    /// # Errors
    ///
    /// `LockConflict` if a fresh lock is held.
    pub fn lock_breaking_stale(
        &self,
        id: OrderId,
        holder: &HolderId,
        stale_after: chrono::Duration,
    ) -> Result<LockToken, StackError> {
        self.try_lock(id, holder, Some(stale_after))
    }

    fn try_lock(
        &self,
        id: OrderId,
        holder: &HolderId,
        stale_after: Option<chrono::Duration>,
    ) -> Result<LockToken, StackError> {
        let now = Utc::now();
        let token = LockToken::issue(id, holder.clone(), now);
        let mut broken: Option<HolderId> = None;
        self.store.update(id, &mut |order| {
            if let Some(held) = &order.lock {
                let stale = stale_after.is_some_and(|max_age| held.is_stale(now, max_age));
                if !stale {
                    return Err(StackError::LockConflict {
                        tier: T::NAME,
                        id,
                        holder: held.holder.clone(),
                    });
                }
                broken = Some(held.holder.clone());
            }
            order.lock = Some(token.clone());
            Ok(())
        })?;
        if let Some(previous) = broken {
            warn!(
                tier = T::NAME,
                order_id = %id,
                previous_holder = %previous,
                holder = %holder,
                "Broke stale order lock"
            );
        }
        Ok(token)
    }

    /// Release the order's lock.
    ///
    /// # Errors
    ///
    /// `LockMismatch` if `token` does not hold the lock.
    pub fn unlock(&self, id: OrderId, token: &LockToken) -> Result<(), StackError> {
        self.store.update(id, &mut |order| {
            order.ensure_locked_by(token)?;
            order.lock = None;
            Ok(())
        })?;
        Ok(())
    }

    /// Apply a delta to a locked order.
    ///
    /// # Errors
    ///
    /// `LockMismatch` without the lock; `OverFill`, `InvalidTransition` or
    /// `InvalidDelta` if the delta does not apply. Nothing is written on error.
    pub fn modify(
        &self,
        id: OrderId,
        token: &LockToken,
        delta: &OrderDelta,
    ) -> Result<Order<T>, StackError> {
        let now = Utc::now();
        let order = self.store.update(id, &mut |order| {
            order.ensure_locked_by(token)?;
            order.apply(delta, now)
        })?;
        debug!(
            tier = T::NAME,
            order_id = %id,
            delta = delta.label(),
            state = %order.state,
            fill = %order.fill,
            "Order modified"
        );
        Ok(order)
    }

    /// Remove a COMPLETED order, releasing the caller's lock in the same step.
    ///
    /// # Errors
    ///
    /// `LockMismatch` without the lock, `NotCompleted` before completion.
    pub fn remove(&self, id: OrderId, token: &LockToken) -> Result<Order<T>, StackError> {
        let removed = self.store.remove(id, &mut |order| {
            order.ensure_locked_by(token)?;
            if order.state != OrderState::Completed {
                return Err(StackError::NotCompleted {
                    id,
                    state: order.state,
                });
            }
            Ok(())
        })?;
        debug!(tier = T::NAME, order_id = %id, "Order removed");
        Ok(removed)
    }
}

impl OrderStack<BrokerTier> {
    /// Broker order carrying `broker_ref`, if any.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn find_by_broker_ref(
        &self,
        broker_ref: &BrokerRef,
    ) -> Result<Option<Order<BrokerTier>>, StackError> {
        Ok(self
            .store
            .scan(&OrderFilter::all())?
            .into_iter()
            .find(|o| o.detail.broker_ref.as_ref() == Some(broker_ref)))
    }
}

/// Restartable cursor over unprocessed order ids.
///
/// Each step reads the store, so orders created while iterating are picked
/// up and orders completed meanwhile are skipped.
pub struct UnprocessedOrders<T: Tier> {
    store: Arc<dyn OrderStore<T>>,
    cursor: Option<OrderId>,
    done: bool,
}

impl<T: Tier> UnprocessedOrders<T> {
    /// Start again from the oldest order.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }
}

impl<T: Tier> Iterator for UnprocessedOrders<T> {
    type Item = Result<OrderId, StackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.next_unprocessed_after(self.cursor) {
            Ok(Some(id)) => {
                self.cursor = Some(id);
                Some(Ok(id))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
