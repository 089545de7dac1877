//! Infrastructure Layer
//!
//! Adapters for the ports defined in the domain and application layers,
//! following hexagonal architecture:
//!
//! - `persistence/`: order stores and position ledgers (memory, JSON files)
//! - `broker/`: broker adapters (paper)
//! - `alerts/`: alert sinks (tracing, memory)
//! - `contracts/`: contract universe built from configuration
//! - `config/`: dependency wiring

pub mod alerts;
pub mod broker;
pub mod config;
pub mod contracts;
pub mod persistence;

pub use alerts::{InMemoryAlertSink, TracingAlertSink};
pub use broker::PaperBroker;
pub use config::Container;
pub use contracts::StaticContractUniverse;
pub use persistence::{
    InMemoryBreakStore, InMemoryOrderStore, InMemoryPositionLedger, JsonFileBreakStore,
    JsonFileOrderStore, JsonFilePositionLedger,
};
