//! Order persistence and expiry queries.
//!
//! The scheduler and the state machine talk to storage through the
//! [`OrderRepository`] trait so tests can substitute a controllable
//! implementation. [`OrderStore`] is the production implementation over the
//! typed storage service.

use crate::{StorageError, StorageService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oms_types::{Order, PaymentMethod, PaymentStatus, StorageKey};
use std::sync::Arc;

/// Storage operations the order lifecycle components depend on.
#[async_trait]
pub trait OrderRepository: Send + Sync {
	/// Persists a new order.
	async fn insert(&self, order: &Order) -> Result<(), StorageError>;

	/// Loads an order by id.
	async fn get(&self, order_id: &str) -> Result<Order, StorageError>;

	/// Finds bank-transfer orders whose payment is still pending, created
	/// at or before `cutoff`, and not yet in a terminal status.
	async fn find_expired_bank_transfers(
		&self,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<Order>, StorageError>;

	/// Replaces an order only if the stored record still equals `previous`.
	///
	/// Returns `Ok(false)` when another writer changed the order in the
	/// meantime; the caller lost the race and must not overwrite.
	async fn update_if_unchanged(
		&self,
		previous: &Order,
		updated: &Order,
	) -> Result<bool, StorageError>;
}

/// Production order store backed by the storage service.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	/// Creates a new OrderStore over the given storage service.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	fn is_expired_candidate(order: &Order, cutoff: DateTime<Utc>) -> bool {
		order.payment_method == PaymentMethod::BankTransfer
			&& order.payment_status == PaymentStatus::Pending
			&& order.created_at <= cutoff
			&& !order.status.is_terminal()
	}
}

#[async_trait]
impl OrderRepository for OrderStore {
	async fn insert(&self, order: &Order) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id, order)
			.await
	}

	async fn get(&self, order_id: &str) -> Result<Order, StorageError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
	}

	async fn find_expired_bank_transfers(
		&self,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<Order>, StorageError> {
		let namespace = StorageKey::Orders.as_str();
		let ids = self.storage.list_ids(namespace).await?;

		let mut matches = Vec::new();
		for id in ids {
			let order: Order = match self.storage.retrieve(namespace, &id).await {
				Ok(order) => order,
				// Deleted between listing and reading; not a candidate.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};

			if Self::is_expired_candidate(&order, cutoff) {
				matches.push(order);
			}
		}

		Ok(matches)
	}

	async fn update_if_unchanged(
		&self,
		previous: &Order,
		updated: &Order,
	) -> Result<bool, StorageError> {
		self.storage
			.update_if_unchanged(StorageKey::Orders.as_str(), &previous.id, previous, updated)
			.await
	}
}
