//! Stack handler: the per-cycle orchestration of the order stacks.
//!
//! Stages, in order:
//!
//! 1. check position breaks
//! 2. spawn contract orders from instrument orders
//! 3. generate forced roll orders
//! 4. create broker orders from contract orders
//! 5. submit broker orders
//! 6. process fills
//! 7. promote resolved orders to completed
//! 8. remove completed order families

mod fills;
mod report;
mod stack_handler;
mod stage;
mod submission;

pub use report::{CycleReport, StageOutcome, StageStats};
pub use stack_handler::{CancelSummary, HandlerDeps, StackHandler};
pub use stage::{SkipReason, Stage, StageTracker};
