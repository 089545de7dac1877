//! Application Services
//!
//! Components the handler delegates to. Apart from the break registry they
//! hold no state of their own: they read the stacks through their accessors
//! and write only through `modify` under a lock.

mod execution_policy;
mod fill_processor;
mod lock_manager;
mod position_view;
mod reconciler;
mod retry;
mod roll_manager;

pub use execution_policy::ExecutionPolicy;
pub use fill_processor::{
    FillOutcome, FillProcessor, aggregate_broker_fills, aggregate_contract_fills,
};
pub use lock_manager::LockManager;
pub use position_view::PositionView;
pub use reconciler::{BreakRegistry, PositionReconciler, compare};
pub use retry::SubmissionRetryPolicy;
pub use roll_manager::RollManager;
