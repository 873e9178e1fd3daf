//! Common types module for the order management system.
//!
//! This module defines the core data types and structures shared by the
//! storage, scheduling, and service crates. It provides a centralized
//! location for domain types to ensure consistency across all components.

/// Cart types and derived total computations.
pub mod cart;
/// Time source abstraction for injectable clocks.
pub mod clock;
/// Order types including line items, statuses, and the history log.
pub mod order;
/// Storage namespace types for managing persistent data.
pub mod storage;

// Re-export all types for convenient access
pub use cart::*;
pub use clock::*;
pub use order::*;
pub use storage::*;
