//! Order types for the order management system.
//!
//! This module defines the order record, its line items, payment fields,
//! and the append-only status history used throughout the order lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A customer order with payment state and a full lifecycle history.
///
/// Orders are created in `Pending` status with a seeded history entry, so
/// the invariant "last history entry matches the current status" holds from
/// the moment of creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique identifier for this order, assigned at creation.
	pub id: String,
	/// Current status of the order.
	pub status: OrderStatus,
	/// How the customer pays for this order.
	pub payment_method: PaymentMethod,
	/// Payment state for non-COD methods.
	pub payment_status: PaymentStatus,
	/// Line items with prices snapshotted at order time.
	pub items: Vec<LineItem>,
	/// Append-only log of status changes. Exactly one entry is added per
	/// successful transition; entries are never mutated or removed.
	pub status_history: Vec<StatusEntry>,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp when this order was last updated.
	pub updated_at: DateTime<Utc>,
	/// Timestamp when the order was delivered, set on entering `Delivered`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub actual_delivery: Option<DateTime<Utc>>,
}

impl Order {
	/// Creates a new pending order with a seeded history entry.
	pub fn new(payment_method: PaymentMethod, items: Vec<LineItem>, now: DateTime<Utc>) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			status: OrderStatus::Pending,
			payment_method,
			payment_status: PaymentStatus::Pending,
			items,
			status_history: vec![StatusEntry {
				status: OrderStatus::Pending,
				note: "Order created".to_string(),
				timestamp: now,
			}],
			created_at: now,
			updated_at: now,
			actual_delivery: None,
		}
	}

	/// Total charge for this order, derived from the snapshotted line items.
	///
	/// Never persisted; always recomputed from `items`.
	pub fn total(&self) -> Decimal {
		self.items
			.iter()
			.map(|item| item.unit_price * Decimal::from(item.quantity))
			.sum()
	}
}

/// A single order line referencing a product variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
	/// Reference to the purchased product.
	pub product_ref: String,
	/// Variant discriminator (e.g. size/colour key).
	pub variant_key: String,
	/// Quantity ordered, always >= 1.
	pub quantity: u32,
	/// Unit price snapshotted at order time, immune to later catalog changes.
	pub unit_price: Decimal,
}

/// One entry in an order's status history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEntry {
	/// The status the order moved to.
	pub status: OrderStatus,
	/// Human-readable note recorded with the change.
	pub note: String,
	/// When the change happened.
	pub timestamp: DateTime<Utc>,
}

/// Status of an order in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Order has been placed but not yet confirmed.
	Pending,
	/// Order has been confirmed (payment received or COD accepted).
	Confirmed,
	/// Order is being prepared for shipment.
	Processing,
	/// Order has been handed to the carrier.
	Shipped,
	/// Order has reached the customer. Terminal.
	Delivered,
	/// Order was cancelled. Terminal.
	Cancelled,
}

impl OrderStatus {
	/// Whether no further transition is permitted from this status.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Processing => "processing",
			OrderStatus::Shipped => "shipped",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
		};
		write!(f, "{}", s)
	}
}

/// How an order is paid for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
	/// Cash on delivery.
	Cod,
	/// Manual bank transfer, subject to the payment timeout.
	BankTransfer,
}

/// Payment state for non-COD orders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	/// Awaiting payment.
	Pending,
	/// Payment received.
	Paid,
	/// Payment attempt failed.
	Failed,
}
