//! Loyalty Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes an operation and a snapshot → returns a transition or a rejection.
//!
//! # Components
//!
//! - **Operation**: closed set of offer operations and their argument encoding
//! - **Program**: the offer state machine evaluated by the execution host
//! - **Escrow**: funding requirement and reserve rules for the escrow account

#![warn(clippy::all)]

pub mod error;
pub mod escrow;
pub mod operation;
pub mod program;

// Re-exports for convenience
pub use error::Rejection;
pub use escrow::{EscrowParams, SETUP_GROUP_OPERATIONS};
pub use operation::{OfferOperation, ACTION_METHOD, SETUP_METHOD};
pub use program::{Effect, EscrowSnapshot, EvalContext, OfferProgram, StateUpdate, Transition};
