//! Alert Port (Driven Port)
//!
//! Interface for raising structured alerts to operators.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shared::{InstrumentId, OrderId};

/// Kind of condition being alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Internal and broker positions diverge.
    PositionBreak,
    /// Submission gave up; manual intervention needed.
    StuckOrder,
    /// The broker rejected an order.
    OrderRejected,
    /// An execution report exceeded the open quantity.
    OverFill,
    /// Configuration cannot resolve an instrument or contract.
    FatalConfiguration,
    /// An unsent order's contract expired; the order was cancelled.
    ContractExpired,
}

impl AlertKind {
    /// Stable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PositionBreak => "position_break",
            Self::StuckOrder => "stuck_order",
            Self::OrderRejected => "order_rejected",
            Self::OverFill => "over_fill",
            Self::FatalConfiguration => "fatal_configuration",
            Self::ContractExpired => "contract_expired",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert kind.
    pub kind: AlertKind,
    /// Instrument concerned, if any.
    pub instrument: Option<InstrumentId>,
    /// Order concerned, if any.
    pub order_id: Option<OrderId>,
    /// Human-readable description.
    pub message: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Create an alert raised now.
    #[must_use]
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            instrument: None,
            order_id: None,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    /// Attach the instrument.
    #[must_use]
    pub fn with_instrument(mut self, instrument: InstrumentId) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// Attach the order.
    #[must_use]
    pub const fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Alert delivery error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertError {
    /// Delivery failed.
    #[error("Alert delivery failed: {message}")]
    DeliveryFailed {
        /// Error details.
        message: String,
    },
}

/// Port for raising alerts.
#[async_trait]
pub trait AlertPort: Send + Sync {
    /// Deliver one alert.
    async fn raise(&self, alert: Alert) -> Result<(), AlertError>;
}

/// No-op alert sink for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpAlertSink;

#[async_trait]
impl AlertPort for NoOpAlertSink {
    async fn raise(&self, _alert: Alert) -> Result<(), AlertError> {
        Ok(())
    }
}
