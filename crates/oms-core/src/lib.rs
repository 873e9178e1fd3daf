//! Core order lifecycle logic for the order management system.
//!
//! This crate contains the two pieces that make the system behave: the
//! order state machine, which enforces valid status transitions and keeps
//! the history log consistent, and the payment-expiry scheduler, which
//! periodically cancels bank-transfer orders that were never paid.

/// Recurring payment-expiry checks with skip-if-busy semantics.
pub mod scheduler;
/// Order state machine and transition validation.
pub mod state;

pub use scheduler::{PaymentExpiryScheduler, TickFailure, TickOutcome, TickSummary};
pub use state::{OrderStateError, OrderStateMachine};
