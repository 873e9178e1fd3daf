//! Configuration module for the order management system.
//!
//! This module provides structures and utilities for loading service
//! configuration from TOML files. Environment variable references of the
//! form `${VAR}` or `${VAR:-default}` are resolved before parsing, and the
//! result is validated so misconfiguration fails at startup rather than at
//! the first scheduler tick.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the order management service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration for the storage backend.
	#[serde(default)]
	pub storage: StorageConfig,
	/// Configuration for the payment-expiry scheduler.
	#[serde(default)]
	pub scheduler: SchedulerConfig,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which backend to use: "memory" or "file".
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	/// Base directory for the file backend.
	#[serde(default = "default_storage_path")]
	pub path: PathBuf,
	/// Interval in seconds for sweeping expired storage entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
	/// Optional TTL in seconds for cart records. Orders are kept forever.
	#[serde(default)]
	pub ttl_carts_seconds: Option<u64>,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			path: default_storage_path(),
			cleanup_interval_seconds: default_cleanup_interval_seconds(),
			ttl_carts_seconds: None,
		}
	}
}

/// Configuration for the payment-expiry scheduler.
///
/// The timeout and note are business constants, not protocol, so they are
/// plain configuration with defaults matching the storefront's policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
	/// Whether the scheduler runs at all.
	#[serde(default = "default_scheduler_enabled")]
	pub enabled: bool,
	/// Minutes a bank-transfer order may stay unpaid before auto-cancel.
	#[serde(default = "default_payment_timeout_minutes")]
	pub payment_timeout_minutes: u64,
	/// Minutes between expiry checks.
	#[serde(default = "default_check_interval_minutes")]
	pub check_interval_minutes: u64,
	/// Note recorded on auto-cancelled orders.
	#[serde(default = "default_cancellation_note")]
	pub cancellation_note: String,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			enabled: default_scheduler_enabled(),
			payment_timeout_minutes: default_payment_timeout_minutes(),
			check_interval_minutes: default_check_interval_minutes(),
			cancellation_note: default_cancellation_note(),
		}
	}
}

fn default_storage_backend() -> String {
	"file".to_string()
}

fn default_storage_path() -> PathBuf {
	PathBuf::from("./data/storage")
}

fn default_cleanup_interval_seconds() -> u64 {
	300
}

fn default_scheduler_enabled() -> bool {
	true
}

fn default_payment_timeout_minutes() -> u64 {
	30
}

fn default_check_interval_minutes() -> u64 {
	1
}

fn default_cancellation_note() -> String {
	"Auto-cancelled: payment timeout".to_string()
}

impl Config {
	/// Loads configuration from a TOML file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		content.parse()
	}

	/// Validates the configuration values.
	pub fn validate(&self) -> Result<(), ConfigError> {
		match self.storage.backend.as_str() {
			"memory" | "file" => {}
			other => {
				return Err(ConfigError::Validation(format!(
					"Unknown storage backend '{}', expected 'memory' or 'file'",
					other
				)))
			}
		}

		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"storage.cleanup_interval_seconds must be at least 1".to_string(),
			));
		}

		if self.scheduler.payment_timeout_minutes == 0 {
			return Err(ConfigError::Validation(
				"scheduler.payment_timeout_minutes must be at least 1".to_string(),
			));
		}

		if self.scheduler.check_interval_minutes == 0 {
			return Err(ConfigError::Validation(
				"scheduler.check_interval_minutes must be at least 1".to_string(),
			));
		}

		Ok(())
	}
}

impl std::str::FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

/// Resolves `${VAR}` and `${VAR:-default}` references against the process
/// environment. A reference without a default to a missing variable is an
/// error.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	// Limit input size to prevent ReDoS attacks
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = match cap.get(0) {
			Some(m) => m,
			None => continue,
		};
		let var_name = match cap.get(1) {
			Some(m) => m.as_str(),
			None => continue,
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_apply_for_empty_config() {
		let config: Config = "".parse().unwrap();

		assert_eq!(config.storage.backend, "file");
		assert_eq!(config.scheduler.payment_timeout_minutes, 30);
		assert_eq!(config.scheduler.check_interval_minutes, 1);
		assert_eq!(
			config.scheduler.cancellation_note,
			"Auto-cancelled: payment timeout"
		);
		assert!(config.scheduler.enabled);
	}

	#[test]
	fn explicit_values_override_defaults() {
		let config: Config = r#"
			[storage]
			backend = "memory"
			cleanup_interval_seconds = 60

			[scheduler]
			payment_timeout_minutes = 45
			check_interval_minutes = 5
			cancellation_note = "Payment window elapsed"
		"#
		.parse()
		.unwrap();

		assert_eq!(config.storage.backend, "memory");
		assert_eq!(config.storage.cleanup_interval_seconds, 60);
		assert_eq!(config.scheduler.payment_timeout_minutes, 45);
		assert_eq!(config.scheduler.check_interval_minutes, 5);
		assert_eq!(config.scheduler.cancellation_note, "Payment window elapsed");
	}

	#[test]
	fn env_vars_are_resolved() {
		std::env::set_var("OMS_TEST_BACKEND", "memory");
		let config: Config = "[storage]\nbackend = \"${OMS_TEST_BACKEND}\""
			.parse()
			.unwrap();
		assert_eq!(config.storage.backend, "memory");
		std::env::remove_var("OMS_TEST_BACKEND");
	}

	#[test]
	fn env_var_default_used_when_missing() {
		let resolved =
			resolve_env_vars("path = \"${OMS_MISSING_VAR:-/tmp/storage}\"").unwrap();
		assert_eq!(resolved, "path = \"/tmp/storage\"");
	}

	#[test]
	fn missing_env_var_without_default_fails() {
		let result = resolve_env_vars("path = \"${OMS_DEFINITELY_MISSING}\"");
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn unknown_backend_rejected() {
		let result = "[storage]\nbackend = \"redis\"".parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn zero_intervals_rejected() {
		let result = "[scheduler]\ncheck_interval_minutes = 0".parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(_))));

		let result = "[scheduler]\npayment_timeout_minutes = 0".parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn from_file_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "[scheduler]\npayment_timeout_minutes = 15\n").unwrap();

		let config = Config::from_file(&path).unwrap();
		assert_eq!(config.scheduler.payment_timeout_minutes, 15);
	}
}
