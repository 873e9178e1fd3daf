//! File-based storage backend implementation.
//!
//! Records are stored one file per key under a namespace subdirectory, each
//! with a fixed-size header carrying TTL information. Writes go through a
//! temp-file-and-rename so readers never observe a partial record, and the
//! whole data directory is guarded by an exclusive lock file so two
//! processes cannot run expiry schedulers over the same data.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use fs2::FileExt;
use oms_config::StorageConfig;
use oms_types::StorageKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

/// Fixed-size file header for TTL support.
///
/// Binary layout (64 bytes total):
/// - bytes 0-3: magic "OMSF"
/// - bytes 4-5: version (u16, little-endian)
/// - bytes 6-13: expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - bytes 14-63: reserved
#[derive(Debug, Clone)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"OMSF";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	/// Creates a new header with the given TTL. A zero TTL means permanent.
	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			unix_now().saturating_add(ttl.as_secs())
		};

		Self { expires_at }
	}

	/// Serializes the header to bytes.
	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	/// Deserializes a header from bytes.
	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}

		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);

		Ok(Self {
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	/// Checks if the data has expired.
	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// TTL configuration for the different storage namespaces.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	/// Builds the TTL table from the storage configuration. Orders are kept
	/// forever; carts may be given a TTL so abandoned carts age out.
	pub fn from_config(config: &StorageConfig) -> Self {
		let mut ttls = HashMap::new();
		if let Some(secs) = config.ttl_carts_seconds {
			ttls.insert(StorageKey::Carts, Duration::from_secs(secs));
		}
		Self { ttls }
	}

	/// Gets the TTL for a specific storage namespace (zero = permanent).
	fn get_ttl(&self, storage_key: StorageKey) -> Duration {
		self.ttls
			.get(&storage_key)
			.copied()
			.unwrap_or(Duration::ZERO)
	}
}

/// File-based storage implementation.
///
/// Keys of the form `namespace:id` map to `<base>/<namespace>/<id>.bin`.
/// The write path (set, compare-and-swap, delete) is serialized by a mutex
/// so a compare-and-swap observes a stable record between its read and its
/// write.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// TTL configuration per namespace.
	ttl_config: TtlConfig,
	/// Serializes all mutating operations.
	write_lock: Mutex<()>,
	/// Exclusive lock on the data directory, held for the storage lifetime.
	_dir_lock: std::fs::File,
}

impl FileStorage {
	/// Name of the lock file guarding the data directory.
	const LOCK_FILE: &'static str = ".oms.lock";

	/// Creates a new FileStorage, taking an exclusive lock on the base
	/// directory.
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Backend(e.to_string()))?;

		let lock_path = base_path.join(Self::LOCK_FILE);
		let dir_lock = std::fs::OpenOptions::new()
			.create(true)
			.write(true)
			.truncate(false)
			.open(&lock_path)
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		dir_lock.try_lock_exclusive().map_err(|_| {
			StorageError::Backend(format!(
				"Storage directory {} is locked by another process",
				base_path.display()
			))
		})?;

		Ok(Self {
			base_path,
			ttl_config,
			write_lock: Mutex::new(()),
			_dir_lock: dir_lock,
		})
	}

	/// Resolves a `namespace:id` key to its file path, rejecting ids that
	/// would escape the namespace directory.
	fn get_file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
		let (namespace, id) = key
			.split_once(':')
			.ok_or_else(|| StorageError::Backend(format!("Malformed storage key '{}'", key)))?;

		if namespace.is_empty() || id.is_empty() {
			return Err(StorageError::Backend(format!(
				"Malformed storage key '{}'",
				key
			)));
		}
		if id.contains(['/', '\\']) || id == "." || id == ".." {
			return Err(StorageError::Backend(format!(
				"Storage id '{}' is not filesystem-safe",
				id
			)));
		}

		Ok(self.base_path.join(namespace).join(format!("{}.bin", id)))
	}

	/// Gets the TTL for a given key based on its namespace.
	fn get_ttl_for_key(&self, key: &str) -> Duration {
		let namespace = key.split(':').next().unwrap_or("");
		namespace
			.parse::<StorageKey>()
			.map(|sk| self.ttl_config.get_ttl(sk))
			.unwrap_or(Duration::ZERO)
	}

	/// Reads the payload of a record, treating missing and expired files as
	/// `NotFound`.
	async fn read_payload(&self, path: &PathBuf) -> Result<Vec<u8>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			}
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Err(StorageError::NotFound);
		}

		Ok(data[FileHeader::SIZE..].to_vec())
	}

	/// Writes a record with header via temp file and rename. Callers must
	/// hold the write lock.
	async fn write_record(
		&self,
		path: &PathBuf,
		value: Vec<u8>,
		ttl: Duration,
	) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let header = FileHeader::new(ttl);
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header.serialize());
		file_data.extend_from_slice(&value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key)?;
		self.read_payload(&path).await
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key)?;
		let ttl = ttl.unwrap_or_else(|| self.get_ttl_for_key(key));

		let _guard = self.write_lock.lock().await;
		self.write_record(&path, value, ttl).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = self.get_file_path(key)?;
		let ttl = self.get_ttl_for_key(key);

		// Read and write under the same lock so no writer can interleave.
		let _guard = self.write_lock.lock().await;
		let current = match self.read_payload(&path).await {
			Ok(current) => current,
			Err(StorageError::NotFound) => return Ok(false),
			Err(e) => return Err(e),
		};
		if current.as_slice() != expected {
			return Ok(false);
		}

		self.write_record(&path, value, ttl).await?;
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key)?;

		let _guard = self.write_lock.lock().await;
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.get_file_path(key)?;
		// An expired record that cleanup has not swept yet does not exist.
		match self.read_payload(&path).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let namespace = prefix.strip_suffix(':').unwrap_or(prefix);
		let dir = self.base_path.join(namespace);

		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				keys.push(format!("{}:{}", namespace, stem));
			}
		}

		Ok(keys)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut dirs = fs::read_dir(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		while let Some(dir_entry) = dirs
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			if !dir_entry.path().is_dir() {
				continue;
			}

			let mut files = fs::read_dir(dir_entry.path())
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			while let Some(entry) = files
				.next_entry()
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?
			{
				let path = entry.path();
				if path.extension() != Some(std::ffi::OsStr::new("bin")) {
					continue;
				}

				match fs::read(&path).await {
					Ok(data) => {
						if let Ok(header) = FileHeader::deserialize(&data) {
							if header.is_expired() {
								if let Err(e) = fs::remove_file(&path).await {
									tracing::warn!(
										"Failed to remove expired file {:?}: {}",
										path,
										e
									);
								} else {
									removed += 1;
								}
							}
						}
					}
					Err(e) => {
						tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					}
				}
			}
		}
		Ok(removed)
	}
}
