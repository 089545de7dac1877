//! Booked positions and position breaks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shared::{ContractId, InstrumentId, OrderId, StoreError};

/// Fills of one completed contract order, booked into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Contract order the fills came from. Bookings are idempotent by this id.
    pub order_id: OrderId,
    /// Instrument traded.
    pub instrument: InstrumentId,
    /// Filled quantity per contract.
    pub legs: Vec<(ContractId, i64)>,
    /// When the booking was made.
    pub booked_at: DateTime<Utc>,
}

/// Durable record of positions from orders already removed from the stacks.
pub trait PositionLedger: Send + Sync {
    /// Book an order's fills. Returns `false` if the order was already booked.
    fn book(&self, booking: Booking) -> Result<bool, StoreError>;

    /// Whether an order has been booked.
    fn is_booked(&self, order_id: OrderId) -> Result<bool, StoreError>;

    /// Net position per contract of an instrument.
    fn contract_positions(
        &self,
        instrument: &InstrumentId,
    ) -> Result<BTreeMap<ContractId, i64>, StoreError>;

    /// Instruments with any booking.
    fn instruments(&self) -> Result<Vec<InstrumentId>, StoreError>;
}

/// Positions derived from a list of bookings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBook {
    bookings: BTreeMap<OrderId, Booking>,
}

impl LedgerBook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a booking unless its order is already present.
    pub fn book(&mut self, booking: Booking) -> bool {
        if self.bookings.contains_key(&booking.order_id) {
            return false;
        }
        self.bookings.insert(booking.order_id, booking);
        true
    }

    /// Whether an order is booked.
    #[must_use]
    pub fn is_booked(&self, order_id: OrderId) -> bool {
        self.bookings.contains_key(&order_id)
    }

    /// Net position per contract of an instrument, zero positions omitted.
    #[must_use]
    pub fn contract_positions(&self, instrument: &InstrumentId) -> BTreeMap<ContractId, i64> {
        let mut positions: BTreeMap<ContractId, i64> = BTreeMap::new();
        for booking in self.bookings.values().filter(|b| b.instrument == *instrument) {
            for (contract, qty) in &booking.legs {
                *positions.entry(contract.clone()).or_default() += qty;
            }
        }
        positions.retain(|_, qty| *qty != 0);
        positions
    }

    /// Instruments with any booking.
    #[must_use]
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut instruments: Vec<InstrumentId> =
            self.bookings.values().map(|b| b.instrument.clone()).collect();
        instruments.sort();
        instruments.dedup();
        instruments
    }
}

/// Divergence between internal and broker-reported position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBreak {
    /// Instrument affected.
    pub instrument: InstrumentId,
    /// Net position derived from the stacks and ledger.
    pub internal: i64,
    /// Net position reported by the broker.
    pub broker: i64,
    /// `internal - broker`.
    pub delta: i64,
    /// When the break was first detected.
    pub detected_at: DateTime<Utc>,
}

/// Durable record of open position breaks.
///
/// A break stays open until acknowledged, across restarts and for every
/// worker sharing the store.
pub trait BreakStore: Send + Sync {
    /// Open a break. Returns `false` if the instrument already has one; the
    /// first detection is kept.
    fn record(&self, position_break: PositionBreak) -> Result<bool, StoreError>;

    /// Whether the instrument has an open break.
    fn is_broken(&self, instrument: &InstrumentId) -> Result<bool, StoreError>;

    /// Clear the instrument's break, returning it if one was open.
    fn acknowledge(&self, instrument: &InstrumentId) -> Result<Option<PositionBreak>, StoreError>;

    /// All open breaks, by instrument.
    fn open_breaks(&self) -> Result<Vec<PositionBreak>, StoreError>;
}

/// Open breaks keyed by instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakBook {
    breaks: BTreeMap<InstrumentId, PositionBreak>,
}

impl BreakBook {
    /// No open breaks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a break unless the instrument already has one.
    pub fn record(&mut self, position_break: PositionBreak) -> bool {
        if self.breaks.contains_key(&position_break.instrument) {
            return false;
        }
        self.breaks
            .insert(position_break.instrument.clone(), position_break);
        true
    }

    /// Whether the instrument has an open break.
    #[must_use]
    pub fn is_broken(&self, instrument: &InstrumentId) -> bool {
        self.breaks.contains_key(instrument)
    }

    /// Clear the instrument's break.
    pub fn acknowledge(&mut self, instrument: &InstrumentId) -> Option<PositionBreak> {
        self.breaks.remove(instrument)
    }

    /// Open breaks, by instrument.
    #[must_use]
    pub fn open_breaks(&self) -> Vec<PositionBreak> {
        self.breaks.values().cloned().collect()
    }

    /// Number of open breaks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breaks.len()
    }

    /// Whether no break is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breaks.is_empty()
    }
}

/// Result of a reconciliation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakStatus {
    /// Positions agree within tolerance.
    Ok,
    /// Positions diverge.
    Broken(PositionBreak),
}

impl BreakStatus {
    /// Whether a break was found.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        matches!(self, Self::Broken(_))
    }
}
