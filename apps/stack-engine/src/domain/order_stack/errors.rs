//! Order stack errors.

use thiserror::Error;

use super::state::OrderState;
use crate::domain::shared::{FillBoundError, HolderId, OrderId, StoreError};

/// Errors from order stack operations.
#[derive(Debug, Error)]
pub enum StackError {
    /// A live order already exists for the same strategy, instrument and contracts.
    #[error("duplicate {tier} order for {key}: live order {existing} exists")]
    DuplicateOrder {
        /// Stack tier.
        tier: &'static str,
        /// Human-readable order key.
        key: String,
        /// The live order holding the key.
        existing: OrderId,
    },

    /// No order with this id in the stack.
    #[error("{tier} order {id} not found")]
    NotFound {
        /// Stack tier.
        tier: &'static str,
        /// Requested id.
        id: OrderId,
    },

    /// The order is locked by another holder.
    #[error("{tier} order {id} is locked by {holder}")]
    LockConflict {
        /// Stack tier.
        tier: &'static str,
        /// Locked order.
        id: OrderId,
        /// Current lock holder.
        holder: HolderId,
    },

    /// The supplied token does not hold the order's lock.
    #[error("order {id} is not locked by the supplied token")]
    LockMismatch {
        /// Order id.
        id: OrderId,
    },

    /// Removal attempted before the order completed.
    #[error("order {id} cannot be removed in state {state}")]
    NotCompleted {
        /// Order id.
        id: OrderId,
        /// Current state.
        state: OrderState,
    },

    /// A fill would break the fill-vector bounds.
    #[error("over-fill on order {id}: {source}")]
    OverFill {
        /// Order id.
        id: OrderId,
        /// Bound that would be violated.
        source: FillBoundError,
    },

    /// State transition not permitted by the state machine.
    #[error("order {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Order id.
        id: OrderId,
        /// Current state.
        from: OrderState,
        /// Requested state.
        to: OrderState,
    },

    /// The new order is malformed.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// The delta does not apply to this order.
    #[error("order {id}: {reason}")]
    InvalidDelta {
        /// Order id.
        id: OrderId,
        /// Why the delta was refused.
        reason: String,
    },

    /// Persistent store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StackError {
    /// Whether the error will likely clear on a later cycle.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }
}
