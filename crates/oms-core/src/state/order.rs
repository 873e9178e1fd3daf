//! Order state machine implementation.
//!
//! Manages order status transitions with validation, ensuring orders move
//! through valid lifecycle states: pending -> confirmed -> processing ->
//! shipped -> delivered, with cancellation possible from any non-terminal
//! state. Every successful transition appends exactly one entry to the
//! order's history log, so the last entry always matches the current status.

use chrono::{DateTime, Utc};
use oms_storage::{OrderRepository, StorageError};
use oms_types::{Clock, Order, OrderStatus, PaymentStatus, StatusEntry};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Order {0} was modified concurrently")]
	ConcurrentModification(String),
}

/// Manages order state transitions and persistence.
pub struct OrderStateMachine {
	repository: Arc<dyn OrderRepository>,
	clock: Arc<dyn Clock>,
}

impl OrderStateMachine {
	pub fn new(repository: Arc<dyn OrderRepository>, clock: Arc<dyn Clock>) -> Self {
		Self { repository, clock }
	}

	/// Applies a status transition to an in-memory order.
	///
	/// The status assignment and the history append are one synchronous
	/// mutation: no caller can observe one without the other. Entering
	/// `Delivered` also records the delivery timestamp. Attempts to leave a
	/// terminal state fail with `InvalidTransition` and leave the order
	/// untouched.
	pub fn apply_transition(
		order: &mut Order,
		new_status: OrderStatus,
		note: &str,
		now: DateTime<Utc>,
	) -> Result<(), OrderStateError> {
		if !Self::is_valid_transition(&order.status, &new_status) {
			return Err(OrderStateError::InvalidTransition {
				from: order.status,
				to: new_status,
			});
		}

		order.status = new_status;
		order.status_history.push(StatusEntry {
			status: new_status,
			note: note.to_string(),
			timestamp: now,
		});
		if new_status == OrderStatus::Delivered {
			order.actual_delivery = Some(now);
		}
		order.updated_at = now;

		Ok(())
	}

	/// Checks if a state transition is valid.
	fn is_valid_transition(from: &OrderStatus, to: &OrderStatus) -> bool {
		// Static transition table - each state maps to allowed next states
		static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
			let mut m = HashMap::new();
			m.insert(
				OrderStatus::Pending,
				HashSet::from([
					OrderStatus::Confirmed,
					OrderStatus::Processing,
					OrderStatus::Cancelled,
				]),
			);
			m.insert(
				OrderStatus::Confirmed,
				HashSet::from([
					OrderStatus::Processing,
					OrderStatus::Shipped,
					OrderStatus::Cancelled,
				]),
			);
			m.insert(
				OrderStatus::Processing,
				HashSet::from([OrderStatus::Shipped, OrderStatus::Cancelled]),
			);
			m.insert(
				OrderStatus::Shipped,
				HashSet::from([OrderStatus::Delivered, OrderStatus::Cancelled]),
			);
			m.insert(OrderStatus::Delivered, HashSet::new()); // terminal
			m.insert(OrderStatus::Cancelled, HashSet::new()); // terminal
			m
		});

		TRANSITIONS
			.get(from)
			.is_some_and(|allowed| allowed.contains(to))
	}

	/// Stores a new order.
	pub async fn store_order(&self, order: &Order) -> Result<(), OrderStateError> {
		self.repository
			.insert(order)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))
	}

	/// Gets an order by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.repository.get(order_id).await.map_err(|e| match e {
			StorageError::NotFound => OrderStateError::OrderNotFound(order_id.to_string()),
			other => OrderStateError::Storage(other.to_string()),
		})
	}

	/// Transitions a stored order to a new status with validation.
	///
	/// The persist is conditional on the order not having changed since it
	/// was loaded; if another transition landed in between, this returns
	/// `ConcurrentModification` and the caller's attempt is dropped rather
	/// than overwriting the winner.
	pub async fn transition_order(
		&self,
		order_id: &str,
		new_status: OrderStatus,
		note: &str,
	) -> Result<Order, OrderStateError> {
		let previous = self.get_order(order_id).await?;

		let mut updated = previous.clone();
		Self::apply_transition(&mut updated, new_status, note, self.clock.now())?;

		self.persist_transition(previous, updated).await
	}

	/// Records a received payment: marks the payment paid and confirms the
	/// order in a single conditional write, so the expiry check can never
	/// see one without the other.
	pub async fn confirm_payment(
		&self,
		order_id: &str,
		note: &str,
	) -> Result<Order, OrderStateError> {
		let previous = self.get_order(order_id).await?;

		let mut updated = previous.clone();
		Self::apply_transition(&mut updated, OrderStatus::Confirmed, note, self.clock.now())?;
		updated.payment_status = PaymentStatus::Paid;

		self.persist_transition(previous, updated).await
	}

	async fn persist_transition(
		&self,
		previous: Order,
		updated: Order,
	) -> Result<Order, OrderStateError> {
		match self
			.repository
			.update_if_unchanged(&previous, &updated)
			.await
		{
			Ok(true) => Ok(updated),
			Ok(false) => Err(OrderStateError::ConcurrentModification(previous.id)),
			Err(e) => Err(OrderStateError::Storage(e.to_string())),
		}
	}
}
