//! Tradable futures contracts and contract selection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::shared::{ContractId, InstrumentId};

/// A tradable contract of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Contract identifier.
    pub id: ContractId,
    /// Instrument the contract belongs to.
    pub instrument: InstrumentId,
    /// Last trading date.
    pub expiry: NaiveDate,
}

impl ContractSpec {
    /// Create a contract.
    #[must_use]
    pub const fn new(id: ContractId, instrument: InstrumentId, expiry: NaiveDate) -> Self {
        Self {
            id,
            instrument,
            expiry,
        }
    }

    /// Whether the contract can no longer be traded on `as_of`.
    #[must_use]
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        as_of > self.expiry
    }

    /// Calendar days from `as_of` to expiry; negative once expired.
    #[must_use]
    pub fn days_to_expiry(&self, as_of: NaiveDate) -> i64 {
        (self.expiry - as_of).num_days()
    }

    /// Whether the contract is inside the roll window on `as_of`.
    #[must_use]
    pub fn in_roll_window(&self, as_of: NaiveDate, window_days: i64) -> bool {
        self.days_to_expiry(as_of) <= window_days
    }
}

/// Lookup of contracts per instrument.
pub trait ContractUniverse: Send + Sync {
    /// Contract by id.
    fn contract(&self, id: &ContractId) -> Option<ContractSpec>;

    /// Contracts of an instrument, ordered by expiry.
    fn contracts_for(&self, instrument: &InstrumentId) -> Vec<ContractSpec>;

    /// Instruments known to the universe.
    fn instruments(&self) -> Vec<InstrumentId>;

    /// Days before expiry at which positions are rolled forward.
    fn roll_window_days(&self) -> i64;

    /// Contract new trades go into: the nearest one outside the roll window.
    fn current_contract(&self, instrument: &InstrumentId, as_of: NaiveDate) -> Option<ContractSpec> {
        let window = self.roll_window_days();
        self.contracts_for(instrument)
            .into_iter()
            .find(|c| !c.in_roll_window(as_of, window))
    }

    /// First contract of the same instrument expiring after `after`.
    fn next_contract(&self, after: &ContractId) -> Option<ContractSpec> {
        let current = self.contract(after)?;
        self.contracts_for(&current.instrument)
            .into_iter()
            .find(|c| c.expiry > current.expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, expiry: (i32, u32, u32)) -> ContractSpec {
        ContractSpec::new(
            ContractId::new(id),
            InstrumentId::new("SOFR"),
            NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
        )
    }

    #[test]
    fn expiry_is_inclusive_of_last_trading_day() {
        let c = spec("SOFR_20261216", (2026, 12, 16));
        assert!(!c.is_expired(NaiveDate::from_ymd_opt(2026, 12, 16).unwrap()));
        assert!(c.is_expired(NaiveDate::from_ymd_opt(2026, 12, 17).unwrap()));
    }

    #[test]
    fn roll_window_counts_calendar_days() {
        let c = spec("SOFR_20261216", (2026, 12, 16));
        let as_of = NaiveDate::from_ymd_opt(2026, 12, 6).unwrap();
        assert_eq!(c.days_to_expiry(as_of), 10);
        assert!(c.in_roll_window(as_of, 10));
        assert!(!c.in_roll_window(as_of, 9));
    }
}
