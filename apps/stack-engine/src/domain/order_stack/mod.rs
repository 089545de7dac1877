//! The three-tier order stack.
//!
//! Instrument orders own contract orders, which own broker orders. Each tier
//! is an [`OrderStack`] over its own store; the shape of an order is shared
//! and parametrized by [`Tier`].

pub mod delta;
pub mod errors;
pub mod order;
pub mod stack;
pub mod state;
pub mod store;
pub mod table;
pub mod tier;

pub use delta::{OrderDelta, SubmissionDelta};
pub use errors::StackError;
pub use order::{LockToken, NewOrder, Order, OrderKey};
pub use stack::{OrderStack, UnprocessedOrders};
pub use state::{OrderState, OrderStateMachine};
pub use store::{OrderFilter, OrderStore, OrderUpdate, RemovalCheck};
pub use table::StackTable;
pub use tier::{
    BrokerDetail, BrokerTier, ContractDetail, ContractTier, ExecutionAlgo, InstrumentDetail,
    InstrumentTier, RollLeg, RollSpec, Submission, Tier,
};

/// Stack of instrument orders.
pub type InstrumentStack = OrderStack<InstrumentTier>;
/// Stack of contract orders.
pub type ContractStack = OrderStack<ContractTier>;
/// Stack of broker orders.
pub type BrokerStack = OrderStack<BrokerTier>;
/// Stored instrument order.
pub type InstrumentOrder = Order<InstrumentTier>;
/// Stored contract order.
pub type ContractOrder = Order<ContractTier>;
/// Stored broker order.
pub type BrokerOrder = Order<BrokerTier>;

/// The three stacks, handed together to components that span tiers.
#[derive(Debug, Clone)]
pub struct OrderStacks {
    /// Instrument orders.
    pub instruments: InstrumentStack,
    /// Contract orders.
    pub contracts: ContractStack,
    /// Broker orders.
    pub brokers: BrokerStack,
}
