//! Observability: Prometheus metrics.
//!
//! Structured logging uses `tracing` directly; the subscriber is installed
//! by the binary.

mod metrics;

pub use self::metrics::{
    MetricsConfig, MetricsError, init_metrics, record_alert, record_cycle, record_fill,
    record_lock_conflict, record_orders_created, record_orders_removed, record_reconciliation,
    record_stage_run, record_submission, set_open_breaks,
};
