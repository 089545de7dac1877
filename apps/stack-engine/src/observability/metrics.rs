//! Prometheus metrics for the stack engine.
//!
//! Recording functions are cheap no-ops until an exporter is installed, so
//! library code records unconditionally and only the binary calls
//! [`init_metrics`].

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Create a metrics configuration for `addr` with default buckets.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            // 1ms to 10s
            latency_buckets: vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Handler Metrics
// ============================================================================

/// Record one stage execution.
///
/// * `stage` - Stage name (e.g., "spawn_contract_orders")
/// * `outcome` - "ran", "skipped" or "failed"
pub fn record_stage_run(stage: &'static str, outcome: &'static str, duration_seconds: f64) {
    counter!("stage_runs_total", "stage" => stage, "outcome" => outcome).increment(1);
    histogram!("stage_duration_seconds", "stage" => stage).record(duration_seconds);
}

/// Record a whole handler cycle.
pub fn record_cycle(aborted: bool, duration_seconds: f64) {
    let outcome = if aborted { "aborted" } else { "completed" };
    counter!("handler_cycles_total", "outcome" => outcome).increment(1);
    histogram!("handler_cycle_duration_seconds").record(duration_seconds);
}

/// Record a lock acquisition that found the order held by someone else.
pub fn record_lock_conflict(tier: &'static str) {
    counter!("order_lock_conflicts_total", "tier" => tier).increment(1);
}

/// Record orders created in a stack.
pub fn record_orders_created(tier: &'static str, count: usize) {
    counter!("orders_created_total", "tier" => tier).increment(count as u64);
}

/// Record orders removed from a stack.
pub fn record_orders_removed(tier: &'static str, count: usize) {
    counter!("orders_removed_total", "tier" => tier).increment(count as u64);
}

// ============================================================================
// Broker Metrics
// ============================================================================

/// Record a broker submission.
///
/// * `status` - "submitted", "rejected", "timeout" or "error"
/// * `algo` - Execution algorithm label
pub fn record_submission(status: &'static str, algo: &str, latency_seconds: f64) {
    counter!(
        "broker_submissions_total",
        "status" => status,
        "algo" => algo.to_string()
    )
    .increment(1);
    histogram!("broker_submission_latency_seconds").record(latency_seconds);
}

/// Record an applied execution report.
pub fn record_fill(capped: bool) {
    let kind = if capped { "capped" } else { "applied" };
    counter!("execution_reports_total", "kind" => kind).increment(1);
}

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Record a reconciliation result for an instrument.
pub fn record_reconciliation(instrument: &str, broken: bool) {
    let status = if broken { "broken" } else { "ok" };
    counter!(
        "reconciliation_checks_total",
        "instrument" => instrument.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Set the number of instruments currently gated by a position break.
pub fn set_open_breaks(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("position_breaks_open").set(count as f64);
}

/// Record a raised alert.
pub fn record_alert(kind: &'static str) {
    counter!("alerts_raised_total", "kind" => kind).increment(1);
}
