//! Persistence Adapters
//!
//! Implementations of the order store, position ledger and break store
//! ports.

pub mod in_memory;
pub mod json_file;

pub use in_memory::{InMemoryBreakStore, InMemoryOrderStore, InMemoryPositionLedger};
pub use json_file::{JsonFileBreakStore, JsonFileOrderStore, JsonFilePositionLedger};
