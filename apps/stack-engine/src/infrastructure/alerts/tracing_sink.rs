//! Alerts as structured log events.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::application::ports::{Alert, AlertError, AlertKind, AlertPort};

/// Logs every alert under the `alert` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl TracingAlertSink {
    /// Create the sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertPort for TracingAlertSink {
    async fn raise(&self, alert: Alert) -> Result<(), AlertError> {
        let instrument = alert.instrument.as_ref().map(ToString::to_string);
        let order_id = alert.order_id.map(|id| id.value());
        match alert.kind {
            AlertKind::StuckOrder | AlertKind::OverFill | AlertKind::FatalConfiguration => {
                error!(
                    target: "alert",
                    kind = %alert.kind,
                    instrument = ?instrument,
                    order_id = ?order_id,
                    raised_at = %alert.raised_at,
                    "{}",
                    alert.message
                );
            }
            AlertKind::PositionBreak | AlertKind::OrderRejected | AlertKind::ContractExpired => {
                warn!(
                    target: "alert",
                    kind = %alert.kind,
                    instrument = ?instrument,
                    order_id = ?order_id,
                    raised_at = %alert.raised_at,
                    "{}",
                    alert.message
                );
            }
        }
        Ok(())
    }
}
