//! Broker Adapters
//!
//! Implementations of `BrokerPort`. The paper broker is the only one that
//! ships with the engine; live brokers plug in behind the same port.

pub mod paper;

pub use paper::PaperBroker;
