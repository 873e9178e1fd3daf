//! Storage module for the order management system.
//!
//! This module provides abstractions for persistent storage of orders and
//! carts, supporting different backend implementations such as in-memory
//! and file-based storage. The byte-level [`StorageInterface`] includes a
//! compare-and-swap primitive so higher layers can perform conditional
//! updates: a write only lands if the record has not changed since it was
//! read. That contract is what makes racing status transitions safe.

use async_trait::async_trait;
use oms_config::StorageConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Domain-level cart persistence.
pub mod carts;
/// Domain-level order persistence and queries.
pub mod orders;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use carts::CartStore;
pub use orders::{OrderRepository, OrderStore};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the service. It provides basic key-value operations with
/// optional TTL support plus the conditional-write and prefix-listing
/// operations the order store builds on.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Writes `value` only if the current bytes equal `expected`.
	///
	/// Returns `Ok(true)` when the swap happened and `Ok(false)` when the
	/// stored bytes differ from `expected` or the key is missing. A `false`
	/// result means another writer got there first; it is not an error.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all keys starting with the given prefix.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	/// Implementations that don't support expiration can return Ok(0).
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0) // Default implementation for backends without TTL support
	}
}

/// Creates a storage backend from configuration.
///
/// The backend name has already been validated by `Config::validate`, but an
/// unknown name still maps to a configuration error rather than a panic.
pub fn create_backend(config: &StorageConfig) -> Result<Box<dyn StorageInterface>, StorageError> {
	match config.backend.as_str() {
		"memory" => Ok(Box::new(implementations::memory::MemoryStorage::new())),
		"file" => {
			let ttl_config = implementations::file::TtlConfig::from_config(config);
			let storage =
				implementations::file::FileStorage::new(config.path.clone(), ttl_config)?;
			Ok(Box::new(storage))
		}
		other => Err(StorageError::Configuration(format!(
			"Unknown storage backend '{}'",
			other
		))),
	}
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic serialization/deserialization.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live.
	///
	/// The namespace and id are combined to form a unique key.
	/// The data is serialized to JSON before storage.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key, bytes, ttl).await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.delete(&key).await
	}

	/// Replaces a value only if it still serializes to the same bytes as
	/// `previous`.
	///
	/// This is the conditional-update path used by status transitions:
	/// `previous` must be the exact record the caller read. Any concurrent
	/// change to the stored record makes this return `Ok(false)`.
	pub async fn update_if_unchanged<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		previous: &T,
		updated: &T,
	) -> Result<bool, StorageError> {
		let key = format!("{}:{}", namespace, id);
		let expected =
			serde_json::to_vec(previous).map_err(|e| StorageError::Serialization(e.to_string()))?;
		let bytes =
			serde_json::to_vec(updated).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.compare_and_swap(&key, &expected, bytes).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.exists(&key).await
	}

	/// Lists the ids of all values stored under a namespace.
	pub async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.list_keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}

	/// Removes expired entries from storage.
	///
	/// Returns the number of entries that were removed.
	/// This is a no-op for backends that don't support TTL.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
