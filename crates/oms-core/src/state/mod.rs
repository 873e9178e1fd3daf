//! Order state management.

mod order;

pub use order::{OrderStateError, OrderStateMachine};
