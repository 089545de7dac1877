//! Errors raised by shared value objects.

use thiserror::Error;

/// A fill vector that does not fit inside its trade vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FillBoundError {
    /// Fill has a different number of legs than the trade.
    #[error("fill has {actual} legs, trade has {expected}")]
    ShapeMismatch {
        /// Legs in the trade.
        expected: usize,
        /// Legs in the fill.
        actual: usize,
    },

    /// Fill leg has the opposite sign of the trade leg.
    #[error("leg {leg}: fill {fill} has the wrong sign for trade {trade}")]
    WrongSign {
        /// Leg index.
        leg: usize,
        /// Requested quantity.
        trade: i64,
        /// Filled quantity.
        fill: i64,
    },

    /// Fill leg is larger in magnitude than the trade leg.
    #[error("leg {leg}: fill {fill} exceeds trade {trade}")]
    Exceeds {
        /// Leg index.
        leg: usize,
        /// Requested quantity.
        trade: i64,
        /// Filled quantity.
        fill: i64,
    },
}

/// Failure of a persistent store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error at '{path}': {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Stored state could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock protecting in-process state was poisoned by a panic.
    #[error("store state poisoned: {0}")]
    Poisoned(String),
}
