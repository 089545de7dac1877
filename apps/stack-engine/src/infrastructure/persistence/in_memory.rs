//! In-memory stores.
//!
//! State lives for the life of the process. Suitable for tests, paper
//! trading and handlers that share one process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::domain::order_stack::{
    NewOrder, Order, OrderFilter, OrderStore, OrderUpdate, RemovalCheck, StackError, StackTable,
    Tier,
};
use crate::domain::positions::{
    Booking, BreakBook, BreakStore, LedgerBook, PositionBreak, PositionLedger,
};
use crate::domain::shared::{ContractId, InstrumentId, OrderId, StoreError};

fn poisoned(e: impl std::fmt::Display) -> StoreError {
    StoreError::Poisoned(e.to_string())
}

// ============================================================================
// Order store
// ============================================================================

/// In-memory implementation of [`OrderStore`].
#[derive(Debug, Default)]
pub struct InMemoryOrderStore<T: Tier> {
    table: RwLock<StackTable<T>>,
}

impl<T: Tier> InMemoryOrderStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(StackTable::new()),
        }
    }

    /// Number of stored orders.
    ///
    /// # Errors
    ///
    /// The store is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.table.read().map_err(poisoned)?.len())
    }
}

impl<T: Tier> OrderStore<T> for InMemoryOrderStore<T> {
    fn insert(
        &self,
        orders: Vec<NewOrder<T>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderId>, StackError> {
        self.table.write().map_err(poisoned)?.insert(orders, now)
    }

    fn get(&self, id: OrderId) -> Result<Option<Order<T>>, StackError> {
        Ok(self.table.read().map_err(poisoned)?.get(id).cloned())
    }

    fn update(&self, id: OrderId, f: OrderUpdate<'_, T>) -> Result<Order<T>, StackError> {
        self.table.write().map_err(poisoned)?.update(id, f)
    }

    fn remove(&self, id: OrderId, check: RemovalCheck<'_, T>) -> Result<Order<T>, StackError> {
        self.table.write().map_err(poisoned)?.remove(id, check)
    }

    fn next_unprocessed_after(
        &self,
        cursor: Option<OrderId>,
    ) -> Result<Option<OrderId>, StackError> {
        Ok(self
            .table
            .read()
            .map_err(poisoned)?
            .next_unprocessed_after(cursor))
    }

    fn scan(&self, filter: &OrderFilter) -> Result<Vec<Order<T>>, StackError> {
        Ok(self.table.read().map_err(poisoned)?.scan(filter))
    }
}

// ============================================================================
// Position ledger
// ============================================================================

/// In-memory implementation of [`PositionLedger`].
#[derive(Debug, Default)]
pub struct InMemoryPositionLedger {
    book: RwLock<LedgerBook>,
}

impl InMemoryPositionLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionLedger for InMemoryPositionLedger {
    fn book(&self, booking: Booking) -> Result<bool, StoreError> {
        Ok(self.book.write().map_err(poisoned)?.book(booking))
    }

    fn is_booked(&self, order_id: OrderId) -> Result<bool, StoreError> {
        Ok(self.book.read().map_err(poisoned)?.is_booked(order_id))
    }

    fn contract_positions(
        &self,
        instrument: &InstrumentId,
    ) -> Result<BTreeMap<ContractId, i64>, StoreError> {
        Ok(self
            .book
            .read()
            .map_err(poisoned)?
            .contract_positions(instrument))
    }

    fn instruments(&self) -> Result<Vec<InstrumentId>, StoreError> {
        Ok(self.book.read().map_err(poisoned)?.instruments())
    }
}

// ============================================================================
// Break store
// ============================================================================

/// In-memory implementation of [`BreakStore`].
#[derive(Debug, Default)]
pub struct InMemoryBreakStore {
    book: RwLock<BreakBook>,
}

impl InMemoryBreakStore {
    /// Create a store with no open breaks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BreakStore for InMemoryBreakStore {
    fn record(&self, position_break: PositionBreak) -> Result<bool, StoreError> {
        Ok(self.book.write().map_err(poisoned)?.record(position_break))
    }

    fn is_broken(&self, instrument: &InstrumentId) -> Result<bool, StoreError> {
        Ok(self.book.read().map_err(poisoned)?.is_broken(instrument))
    }

    fn acknowledge(&self, instrument: &InstrumentId) -> Result<Option<PositionBreak>, StoreError> {
        Ok(self.book.write().map_err(poisoned)?.acknowledge(instrument))
    }

    fn open_breaks(&self) -> Result<Vec<PositionBreak>, StoreError> {
        Ok(self.book.read().map_err(poisoned)?.open_breaks())
    }
}
