//! Cart types for the order management system.
//!
//! Carts are transient, one per user, with totals derived on read rather
//! than persisted so they can never drift from the line items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's shopping cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cart {
	/// Owner of this cart. Storage keys carts by this value, enforcing one
	/// cart per user.
	pub user_id: String,
	/// Cart lines with prices snapshotted when the item was added.
	pub items: Vec<CartItem>,
	/// Timestamp when this cart was last updated.
	pub updated_at: DateTime<Utc>,
}

impl Cart {
	/// Creates an empty cart for the given user.
	pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
		Self {
			user_id: user_id.into(),
			items: Vec::new(),
			updated_at: now,
		}
	}

	/// Adds an item to the cart, merging quantities when the same product
	/// variant is already present. The existing line's snapshot price wins.
	pub fn add_item(&mut self, item: CartItem, now: DateTime<Utc>) {
		match self
			.items
			.iter_mut()
			.find(|existing| existing.same_variant(&item))
		{
			Some(existing) => existing.quantity += item.quantity,
			None => self.items.push(item),
		}
		self.updated_at = now;
	}

	/// Removes all lines for the given product variant.
	pub fn remove_item(&mut self, product_ref: &str, variant_key: &str, now: DateTime<Utc>) {
		self.items
			.retain(|item| !(item.product_ref == product_ref && item.variant_key == variant_key));
		self.updated_at = now;
	}

	/// Total price of the cart, derived from the current items.
	pub fn total(&self) -> Decimal {
		self.items
			.iter()
			.map(|item| item.unit_price * Decimal::from(item.quantity))
			.sum()
	}

	/// Total number of units across all lines.
	pub fn total_items(&self) -> u32 {
		self.items.iter().map(|item| item.quantity).sum()
	}
}

/// A single line in a cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
	/// Reference to the product.
	pub product_ref: String,
	/// Variant discriminator (e.g. size/colour key).
	pub variant_key: String,
	/// Quantity, always >= 1.
	pub quantity: u32,
	/// Unit price snapshotted when the item was added.
	pub unit_price: Decimal,
}

impl CartItem {
	fn same_variant(&self, other: &CartItem) -> bool {
		self.product_ref == other.product_ref && self.variant_key == other.variant_key
	}
}
