//! Shared value objects.

mod identifiers;
mod trade_vector;

pub use identifiers::{BrokerRef, ContractId, HolderId, InstrumentId, OrderId, StrategyId};
pub use trade_vector::TradeVector;
