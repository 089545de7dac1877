// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Stack Engine - Order Stack Execution Core
//!
//! Turns instrument-level orders from trading strategies into broker
//! executions through three order stacks, and carries the executions back.
//!
//! # Architecture (Clean Architecture + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: order stacks and their rules
//!   - `order_stack`: orders, state machine, deltas, locks, the stack store port
//!   - `contracts`: tradable contracts and contract selection
//!   - `positions`: booked positions, position breaks
//!
//! - **Application**: orchestration
//!   - `ports`: interfaces for external systems (`BrokerPort`, `AlertPort`)
//!   - `services`: fills, rolls, reconciliation, locking, retries
//!   - `handler`: the eight-stage handler cycle
//!
//! - **Infrastructure**: adapters
//!   - `persistence`: order stores, ledgers and break stores (memory, JSON files)
//!   - `broker`: paper broker
//!   - `alerts`: tracing and in-memory alert sinks
//!   - `contracts`: contract universe from configuration
//!   - `config`: dependency injection container
//!
//! # Order Flow
//!
//! ```text
//! strategy ─► instrument order ─► contract orders ─► broker orders ─► broker
//!                   ▲                    ▲                 │
//!                   └──── fills ◄────────┴──── fills ◄─────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Order stacks, contracts and positions.
pub mod domain;

/// Application layer - Ports, services and the stack handler.
pub mod application;

/// Infrastructure layer - Adapters and wiring.
pub mod infrastructure;

// =============================================================================
// Cross-cutting
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Engine error taxonomy.
pub mod error;

/// Metrics recording.
pub mod observability;

// =============================================================================
// Re-exports
// =============================================================================

// Domain re-exports
pub use domain::contracts::{ContractSpec, ContractUniverse};
pub use domain::order_stack::{
    BrokerOrder, ContractOrder, ExecutionAlgo, InstrumentOrder, NewOrder, Order, OrderDelta,
    OrderFilter, OrderStack, OrderStacks, OrderState, StackError,
};
pub use domain::shared::{
    BrokerRef, ContractId, HolderId, InstrumentId, OrderId, StrategyId, TradeVector,
};

// Application re-exports
pub use application::handler::{CancelSummary, CycleReport, Stage, StageOutcome, StackHandler};
pub use application::ports::{Alert, AlertKind, AlertPort, BrokerError, BrokerPort};

// Infrastructure re-exports
pub use infrastructure::{Container, InMemoryAlertSink, PaperBroker, StaticContractUniverse};

pub use config::{Config, load_config};
pub use error::{EngineError, EngineResult};
