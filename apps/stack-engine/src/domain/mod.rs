//! Domain Layer
//!
//! Pure types and rules with no infrastructure dependencies.
//!
//! # Bounded Contexts
//!
//! - [`order_stack`]: the three-tier order stack, its state machine and locks
//! - [`contracts`]: tradable contracts and contract selection
//! - [`positions`]: booked positions and position breaks
//! - [`shared`]: identifiers and trade vectors

pub mod contracts;
pub mod order_stack;
pub mod positions;
pub mod shared;
