//! Cart persistence.
//!
//! Carts are keyed by user id, which makes "one cart per user" a property
//! of the key space rather than something to enforce with checks.

use crate::{StorageError, StorageService};
use chrono::{DateTime, Utc};
use oms_types::{Cart, StorageKey};
use std::sync::Arc;
use std::time::Duration;

/// Cart store backed by the storage service.
pub struct CartStore {
	storage: Arc<StorageService>,
	/// Optional TTL so abandoned carts age out of the file backend.
	ttl: Option<Duration>,
}

impl CartStore {
	/// Creates a new CartStore over the given storage service.
	pub fn new(storage: Arc<StorageService>, ttl: Option<Duration>) -> Self {
		Self { storage, ttl }
	}

	/// Loads a user's cart.
	pub async fn get(&self, user_id: &str) -> Result<Cart, StorageError> {
		self.storage
			.retrieve(StorageKey::Carts.as_str(), user_id)
			.await
	}

	/// Loads a user's cart, creating an empty one if none exists.
	pub async fn get_or_create(
		&self,
		user_id: &str,
		now: DateTime<Utc>,
	) -> Result<Cart, StorageError> {
		match self.get(user_id).await {
			Ok(cart) => Ok(cart),
			Err(StorageError::NotFound) => Ok(Cart::new(user_id, now)),
			Err(e) => Err(e),
		}
	}

	/// Persists a cart under its owner's id, replacing any existing cart.
	pub async fn put(&self, cart: &Cart) -> Result<(), StorageError> {
		self.storage
			.store_with_ttl(StorageKey::Carts.as_str(), &cart.user_id, cart, self.ttl)
			.await
	}

	/// Removes a user's cart, typically after checkout.
	pub async fn remove(&self, user_id: &str) -> Result<(), StorageError> {
		self.storage.remove(StorageKey::Carts.as_str(), user_id).await
	}
}
