//! Mutations applied to an order under its lock.

use rust_decimal::Decimal;

use crate::domain::shared::{BrokerRef, OrderId, TradeVector};
use chrono::{DateTime, Utc};

/// A single atomic mutation of one order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderDelta {
    /// Incremental execution: `fill` is added to the order's fill vector.
    Fill {
        /// Quantity executed by this report, per leg.
        fill: TradeVector,
        /// Average execution price of this report.
        price: Option<Decimal>,
    },
    /// Replace the fill vector with an aggregate re-derived from children.
    SetFill {
        /// Aggregate fill per leg.
        fill: TradeVector,
        /// Aggregate volume-weighted price.
        avg_price: Option<Decimal>,
    },
    /// Cancel the order's open remainder.
    Cancel,
    /// Attach newly created children.
    AddChildren(Vec<OrderId>),
    /// Promote a resolved order whose children are all completed.
    Complete,
    /// Broker submission bookkeeping.
    Submission(SubmissionDelta),
}

/// Submission bookkeeping for broker orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionDelta {
    /// Claim the order for a submission attempt.
    Reserve,
    /// The broker accepted the order.
    Submitted {
        /// Broker reference for later fills and cancels.
        broker_ref: BrokerRef,
    },
    /// The attempt timed out or failed transiently.
    Failed {
        /// Earliest time for the next attempt.
        retry_at: DateTime<Utc>,
    },
    /// The broker rejected the order. Cancels it.
    Rejected {
        /// Broker's reason.
        reason: String,
    },
    /// Give up automatic submission.
    MarkStuck,
    /// A cancel request was sent to the broker.
    RequestCancel,
}

impl OrderDelta {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::SetFill { .. } => "set_fill",
            Self::Cancel => "cancel",
            Self::AddChildren(_) => "add_children",
            Self::Complete => "complete",
            Self::Submission(SubmissionDelta::Reserve) => "reserve",
            Self::Submission(SubmissionDelta::Submitted { .. }) => "submitted",
            Self::Submission(SubmissionDelta::Failed { .. }) => "submit_failed",
            Self::Submission(SubmissionDelta::Rejected { .. }) => "rejected",
            Self::Submission(SubmissionDelta::MarkStuck) => "mark_stuck",
            Self::Submission(SubmissionDelta::RequestCancel) => "request_cancel",
        }
    }
}
