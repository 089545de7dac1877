//! Order state and the transition rules shared by all three stacks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order state in the stack lifecycle.
///
/// ```text
/// CREATED -> LOCKED -> PARTIALLY_FILLED -> FILLED -> COMPLETED
///    \          \            \                          ^
///     +----------+------------+--> CANCELLED -----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Created, not yet taken up.
    Created,
    /// Taken up for execution: children spawned or broker submission confirmed.
    Locked,
    /// Some, but not all, of the trade has been filled.
    PartiallyFilled,
    /// The whole trade has been filled.
    Filled,
    /// Cancelled explicitly or rejected by the broker.
    Cancelled,
    /// Own trade resolved and every child completed. Eligible for removal.
    Completed,
}

impl OrderState {
    /// Whether the order has reached its terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the order's own trade is resolved (filled or cancelled).
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Completed)
    }

    /// Whether the order counts towards the one-live-order-per-key rule.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Whether the order may still receive fills.
    #[must_use]
    pub const fn can_fill(&self) -> bool {
        matches!(self, Self::Created | Self::Locked | Self::PartiallyFilled)
    }

    /// Whether the order may be cancelled.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self, Self::Created | Self::Locked | Self::PartiallyFilled)
    }

    /// Stable uppercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Locked => "LOCKED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validates state transitions.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check if a state transition is valid.
    #[must_use]
    pub const fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
        matches!(
            (from, to),
            (OrderState::Created, OrderState::Locked)
                | (
                    OrderState::Created | OrderState::Locked | OrderState::PartiallyFilled,
                    OrderState::PartiallyFilled | OrderState::Filled | OrderState::Cancelled
                )
                | (OrderState::Filled | OrderState::Cancelled, OrderState::Completed)
        )
    }

    /// Get all valid next states from a given state.
    #[must_use]
    pub fn valid_next_states(from: OrderState) -> Vec<OrderState> {
        match from {
            OrderState::Created => vec![
                OrderState::Locked,
                OrderState::PartiallyFilled,
                OrderState::Filled,
                OrderState::Cancelled,
            ],
            OrderState::Locked | OrderState::PartiallyFilled => vec![
                OrderState::PartiallyFilled,
                OrderState::Filled,
                OrderState::Cancelled,
            ],
            OrderState::Filled | OrderState::Cancelled => vec![OrderState::Completed],
            OrderState::Completed => vec![],
        }
    }
}
