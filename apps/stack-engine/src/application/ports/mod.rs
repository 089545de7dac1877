//! Application Ports (Driven)
//!
//! Ports define how the engine uses external systems. Adapters live in the
//! infrastructure layer.

mod alert_port;
mod broker_port;

pub use alert_port::{Alert, AlertError, AlertKind, AlertPort, NoOpAlertSink};
pub use broker_port::{
    BrokerError, BrokerOrderRequest, BrokerPort, CancelAck, ExecutionReport,
};
