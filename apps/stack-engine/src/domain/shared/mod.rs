//! Shared Domain Types
//!
//! Value objects and errors shared across the three order stacks.

pub mod errors;
pub mod value_objects;

pub use errors::{FillBoundError, StoreError};
pub use value_objects::{
    BrokerRef, ContractId, HolderId, InstrumentId, OrderId, StrategyId, TradeVector,
};
