//! Broker Port (Driven Port)
//!
//! Interface for transmitting broker orders and reading back executions and
//! positions. Wire protocols live behind implementations of this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order_stack::{BrokerOrder, ExecutionAlgo};
use crate::domain::shared::{BrokerRef, ContractId, InstrumentId, OrderId, StrategyId, TradeVector};

/// Request to submit a broker order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    /// Our broker order id, echoed as the client order id.
    pub client_order_id: OrderId,
    /// Owning strategy.
    pub strategy: StrategyId,
    /// Instrument traded.
    pub instrument: InstrumentId,
    /// Signed quantity per contract.
    pub legs: Vec<(ContractId, i64)>,
    /// Execution algorithm.
    pub algo: ExecutionAlgo,
}

impl BrokerOrderRequest {
    /// Build the request for a stored broker order.
    #[must_use]
    pub fn for_order(order: &BrokerOrder) -> Self {
        Self {
            client_order_id: order.id,
            strategy: order.strategy_id.clone(),
            instrument: order.instrument_id.clone(),
            legs: order
                .detail
                .legs
                .iter()
                .cloned()
                .zip(order.trade.legs().iter().copied())
                .collect(),
            algo: order.detail.algo,
        }
    }

    /// Requested quantity as a trade vector.
    #[must_use]
    pub fn trade(&self) -> TradeVector {
        TradeVector::new(self.legs.iter().map(|(_, qty)| *qty).collect())
    }
}

/// Execution reported by the broker for one submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Broker reference of the order.
    pub broker_ref: BrokerRef,
    /// Quantity executed by this report, per leg. Not cumulative.
    pub filled: TradeVector,
    /// Average price of this execution.
    pub avg_price: Option<Decimal>,
    /// When the broker reported the execution.
    pub reported_at: DateTime<Utc>,
}

/// Broker response to a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// The open remainder is cancelled.
    Cancelled,
    /// The request was accepted but is not confirmed yet.
    Pending,
    /// Nothing left to cancel; the order is fully executed.
    AlreadyFilled,
}

/// Broker port error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Order rejected by broker.
    #[error("Order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Connection error.
    #[error("Broker connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// The call did not complete in time.
    #[error("Broker call timed out after {millis}ms")]
    Timeout {
        /// Time waited.
        millis: u64,
    },

    /// Unknown broker reference.
    #[error("Order not found: {broker_ref}")]
    OrderNotFound {
        /// The missing reference.
        broker_ref: BrokerRef,
    },
}

impl BrokerError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionError { .. } | Self::Timeout { .. })
    }
}

/// Port for broker interactions.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Submit an order.
    async fn submit(&self, request: &BrokerOrderRequest) -> Result<BrokerRef, BrokerError>;

    /// Request cancellation of a submitted order's open remainder.
    async fn cancel(&self, broker_ref: &BrokerRef) -> Result<CancelAck, BrokerError>;

    /// Executions since the previous poll, in the order they happened.
    async fn poll_fills(&self) -> Result<Vec<ExecutionReport>, BrokerError>;

    /// Net position per instrument as the broker sees it.
    async fn reported_positions(&self) -> Result<HashMap<InstrumentId, i64>, BrokerError>;
}
