//! State management for orders.
//!
//! Holds the transition table and the guarded transitions used by the
//! processing handler and the expiration sweeper.

pub mod order;

pub use order::{OrderStateError, OrderStateMachine, TransitionOutcome};
