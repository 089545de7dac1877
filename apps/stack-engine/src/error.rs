//! Engine-level error taxonomy.
//!
//! Every failure the handler sees is wrapped in [`EngineError`] and given an
//! [`ErrorClass`] that decides how the cycle reacts:
//!
//! | Class | Examples | Reaction |
//! |-------|----------|----------|
//! | `Transient` | lock conflict, broker timeout | retried on a later cycle |
//! | `Terminal` | broker rejection, stuck order | order cancelled or parked, alerted |
//! | `Integrity` | over-fill, invalid transition | capped or refused, alerted |
//! | `Gate` | position break | instrument suspended until acknowledged |
//! | `Fatal` | unresolvable contract, store failure | cycle aborted |

use thiserror::Error;

use crate::application::ports::{AlertError, BrokerError};
use crate::config::ConfigError;
use crate::domain::order_stack::StackError;
use crate::domain::shared::{InstrumentId, OrderId, StoreError};

/// How the engine reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retried on a later cycle.
    Transient,
    /// Final for the affected order.
    Terminal,
    /// Data anomaly; never silently absorbed.
    Integrity,
    /// Suspends order generation for one instrument.
    Gate,
    /// Aborts the whole cycle.
    Fatal,
}

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Order stack operation failed.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Broker call failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Position ledger failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Alert could not be delivered.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Instrument or contract mapping cannot be resolved.
    #[error("fatal configuration: {0}")]
    FatalConfiguration(String),

    /// Instrument is gated by an open position break.
    #[error("position break open for {instrument}")]
    PositionBreak {
        /// Gated instrument.
        instrument: InstrumentId,
    },

    /// Submission retries exhausted.
    #[error("broker order {order_id} is stuck: {reason}")]
    StuckOrder {
        /// Stuck broker order.
        order_id: OrderId,
        /// Why it is stuck.
        reason: String,
    },
}

impl EngineError {
    /// Classify the error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Stack(e) => match e {
                StackError::LockConflict { .. } => ErrorClass::Transient,
                StackError::DuplicateOrder { .. } | StackError::InvalidOrder(_) => {
                    ErrorClass::Terminal
                }
                StackError::Store(_) => ErrorClass::Fatal,
                StackError::NotFound { .. }
                | StackError::LockMismatch { .. }
                | StackError::NotCompleted { .. }
                | StackError::OverFill { .. }
                | StackError::InvalidTransition { .. }
                | StackError::InvalidDelta { .. } => ErrorClass::Integrity,
            },
            Self::Broker(e) => match e {
                BrokerError::Timeout { .. } | BrokerError::ConnectionError { .. } => {
                    ErrorClass::Transient
                }
                BrokerError::OrderRejected { .. } => ErrorClass::Terminal,
                BrokerError::OrderNotFound { .. } => ErrorClass::Integrity,
            },
            Self::Alert(_) => ErrorClass::Transient,
            Self::Store(_) | Self::Config(_) | Self::FatalConfiguration(_) => ErrorClass::Fatal,
            Self::PositionBreak { .. } => ErrorClass::Gate,
            Self::StuckOrder { .. } => ErrorClass::Terminal,
        }
    }

    /// Whether the error aborts the cycle.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Fatal)
    }

    /// Whether the error is a lock conflict.
    #[must_use]
    pub const fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Stack(StackError::LockConflict { .. }))
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
