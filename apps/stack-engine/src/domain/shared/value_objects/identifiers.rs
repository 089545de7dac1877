//! Strongly-typed identifiers for stack entities.
//!
//! These prevent mixing up IDs from different contexts.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(StrategyId, "Identifier of the strategy that owns an order.");
define_id!(
    InstrumentId,
    "Identifier for a traded instrument before contract selection (e.g. `SOFR`)."
);
define_id!(
    ContractId,
    "Identifier for a specific tradable futures contract (e.g. `SOFR_20261216`)."
);
define_id!(
    HolderId,
    "Identifier of a process (handler instance) that may hold order locks."
);
define_id!(BrokerRef, "Broker's unique reference for a submitted order.");

impl StrategyId {
    /// Pseudo-strategy that owns forced roll orders.
    pub const ROLL: &'static str = "_ROLL_PSEUDO_STRATEGY";

    /// The roll pseudo-strategy.
    #[must_use]
    pub fn roll() -> Self {
        Self::new(Self::ROLL)
    }

    /// Whether this is the roll pseudo-strategy.
    #[must_use]
    pub fn is_roll(&self) -> bool {
        self.0 == Self::ROLL
    }
}

impl HolderId {
    /// Generate a unique holder identity for this process.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Order identifier, unique within its stack.
///
/// Allocated by the store in strictly increasing order, so ordering by id
/// is ordering by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(u64);

impl OrderId {
    /// Create an order id from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id allocated after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_id_new_and_display() {
        let id = InstrumentId::new("SOFR");
        assert_eq!(id.as_str(), "SOFR");
        assert_eq!(format!("{id}"), "SOFR");
    }

    #[test]
    fn contract_id_from_string() {
        let id: ContractId = "SOFR_20261216".into();
        assert_eq!(id.as_str(), "SOFR_20261216");

        let id: ContractId = String::from("SOFR_20270317").into();
        assert_eq!(id.into_inner(), "SOFR_20270317");
    }

    #[test]
    fn roll_strategy_is_recognised() {
        assert!(StrategyId::roll().is_roll());
        assert!(!StrategyId::new("carry").is_roll());
    }

    #[test]
    fn holder_ids_are_unique() {
        let a = HolderId::generate("handler");
        let b = HolderId::generate("handler");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("handler-"));
    }

    #[test]
    fn order_ids_are_ordered() {
        let first = OrderId::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().value(), 2);
        assert_eq!(format!("{}", OrderId::new(42)), "42");
    }

    #[test]
    fn order_id_serializes_as_number() {
        let json = serde_json::to_string(&OrderId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
