//! Main entry point for the order management service.
//!
//! This binary wires configuration, storage, and the payment-expiry
//! scheduler together and runs until interrupted. Order mutations arrive
//! through external callers using the `oms-core` APIs; this process is
//! responsible for the recurring expiry checks and storage housekeeping.

use clap::Parser;
use oms_config::Config;
use oms_core::PaymentExpiryScheduler;
use oms_storage::{create_backend, OrderStore, StorageService};
use oms_types::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command-line arguments for the order management service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the storage backend and order store
/// 5. Runs the payment-expiry scheduler until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt().with_env_filter(env_filter).with_target(true).init();

	tracing::info!("Started order management service");

	let config = Config::from_file(&args.config)?;
	tracing::info!(backend = %config.storage.backend, "Loaded configuration");

	let backend = create_backend(&config.storage)?;
	let storage = Arc::new(StorageService::new(backend));
	let repository = Arc::new(OrderStore::new(storage.clone()));

	// Start storage cleanup task
	let cleanup_storage = storage.clone();
	let cleanup_interval = Duration::from_secs(config.storage.cleanup_interval_seconds);
	let cleanup_handle = tokio::spawn(async move {
		let mut interval = tokio::time::interval(cleanup_interval);
		loop {
			interval.tick().await;
			match cleanup_storage.cleanup_expired().await {
				Ok(count) if count > 0 => {
					tracing::debug!("Storage cleanup: removed {} expired entries", count);
				}
				Err(e) => {
					tracing::warn!("Storage cleanup failed: {}", e);
				}
				_ => {} // No expired entries
			}
		}
	});

	let scheduler = Arc::new(PaymentExpiryScheduler::new(
		repository,
		Arc::new(SystemClock),
		config.scheduler.clone(),
	));
	if config.scheduler.enabled {
		let check_interval =
			Duration::from_secs(config.scheduler.check_interval_minutes * 60);
		scheduler.clone().start(check_interval);
	} else {
		tracing::info!("Payment-expiry scheduler disabled by configuration");
	}

	tokio::signal::ctrl_c().await?;
	tracing::info!("Shutdown signal received");

	scheduler.stop();
	cleanup_handle.abort();

	tracing::info!("Stopped order management service");
	Ok(())
}
