//! Alert Sinks
//!
//! `AlertPort` implementations: structured log lines for operators, and an
//! in-memory sink for tests and embedding.

mod in_memory;
mod tracing_sink;

pub use in_memory::InMemoryAlertSink;
pub use tracing_sink::TracingAlertSink;
