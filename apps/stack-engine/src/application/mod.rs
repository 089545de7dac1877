//! Application Layer
//!
//! The application layer orchestrates domain logic. It defines:
//!
//! - **Ports**: Interfaces for the broker and alerting collaborators
//! - **Services**: Locking, fill propagation, rolls and reconciliation
//! - **Handler**: The staged cycle that drives the order stacks

pub mod handler;
pub mod ports;
pub mod services;

pub use handler::*;
pub use ports::*;
