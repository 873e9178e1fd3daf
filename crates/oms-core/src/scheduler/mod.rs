//! Payment-expiry scheduler.
//!
//! Periodically finds bank-transfer orders that have been awaiting payment
//! longer than the configured timeout and cancels them through the order
//! state machine. Checks never overlap: a tick that fires while a previous
//! check is still running is skipped entirely, so under slow storage the
//! effective check frequency degrades instead of compounding.

use crate::state::OrderStateMachine;
use oms_config::SchedulerConfig;
use oms_storage::OrderRepository;
use oms_types::{Clock, OrderStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Result of a single expiry check.
#[derive(Debug)]
pub enum TickOutcome {
	/// The check ran; see the summary for what happened.
	Completed(TickSummary),
	/// A previous check was still in flight; nothing was done.
	Skipped,
	/// The candidate query failed; no orders were touched.
	QueryFailed(String),
}

/// Summary of one completed expiry check.
#[derive(Debug, Default)]
pub struct TickSummary {
	/// Ids of orders cancelled by this check.
	pub cancelled: Vec<String>,
	/// Orders that changed under us between query and persist. Losing such
	/// a race is a normal outcome, not an error.
	pub lost_races: usize,
	/// Orders whose cancellation could not be persisted.
	pub failures: Vec<TickFailure>,
}

/// A per-order persist failure within a tick.
#[derive(Debug)]
pub struct TickFailure {
	pub order_id: String,
	pub error: String,
}

/// Recurring task that cancels bank-transfer orders whose payment window
/// has elapsed.
///
/// All run state lives on this struct, so tests can create independent
/// instances. `start`/`stop` manage the timer task; the in-flight flag
/// guards individual checks and is independent of the timer.
pub struct PaymentExpiryScheduler {
	repository: Arc<dyn OrderRepository>,
	clock: Arc<dyn Clock>,
	config: SchedulerConfig,
	/// Set while a check is executing. Cleared by a drop guard so an early
	/// return cannot leave it stuck.
	check_in_flight: AtomicBool,
	/// Handle of the timer task while the scheduler is started.
	timer: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag when the check ends, on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl PaymentExpiryScheduler {
	pub fn new(
		repository: Arc<dyn OrderRepository>,
		clock: Arc<dyn Clock>,
		config: SchedulerConfig,
	) -> Self {
		Self {
			repository,
			clock,
			config,
			check_in_flight: AtomicBool::new(false),
			timer: Mutex::new(None),
		}
	}

	/// Runs one expiry check.
	///
	/// Returns [`TickOutcome::Skipped`] without touching storage when a
	/// previous check has not finished. Per-order persist failures do not
	/// roll back cancellations already applied in the same tick.
	pub async fn check_and_cancel_expired(&self) -> TickOutcome {
		if self.check_in_flight.swap(true, Ordering::SeqCst) {
			return TickOutcome::Skipped;
		}
		let _guard = InFlightGuard(&self.check_in_flight);

		let cutoff =
			self.clock.now() - chrono::Duration::minutes(self.config.payment_timeout_minutes as i64);

		let candidates = match self.repository.find_expired_bank_transfers(cutoff).await {
			Ok(candidates) => candidates,
			Err(e) => {
				tracing::warn!(error = %e, "Expiry candidate query failed");
				return TickOutcome::QueryFailed(e.to_string());
			}
		};

		let mut summary = TickSummary::default();
		for previous in candidates {
			let mut cancelled = previous.clone();
			if let Err(e) = OrderStateMachine::apply_transition(
				&mut cancelled,
				OrderStatus::Cancelled,
				&self.config.cancellation_note,
				self.clock.now(),
			) {
				// Order reached a terminal state between query and now
				tracing::debug!(order_id = %previous.id, error = %e, "Skipping expired order");
				summary.lost_races += 1;
				continue;
			}

			match self
				.repository
				.update_if_unchanged(&previous, &cancelled)
				.await
			{
				Ok(true) => summary.cancelled.push(previous.id),
				Ok(false) => {
					// Another transition won; their write stands
					tracing::debug!(order_id = %previous.id, "Cancellation lost a race");
					summary.lost_races += 1;
				}
				Err(e) => {
					tracing::warn!(
						order_id = %previous.id,
						error = %e,
						"Failed to persist auto-cancellation"
					);
					summary.failures.push(TickFailure {
						order_id: previous.id,
						error: e.to_string(),
					});
				}
			}
		}

		TickOutcome::Completed(summary)
	}

	/// Starts the recurring expiry check.
	///
	/// Runs one check immediately, then one per interval. No-op when
	/// already started.
	pub fn start(self: Arc<Self>, interval: Duration) {
		let mut timer = self.timer_guard();
		if timer.is_some() {
			tracing::debug!("Payment-expiry scheduler already started");
			return;
		}

		// The task holds a weak reference so it does not keep the scheduler
		// alive; dropping the last handle stops the timer.
		let scheduler = Arc::downgrade(&self);
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			// A tick that would fire during a slow check is dropped, not
			// queued; the in-flight flag already skips overlap
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

			loop {
				ticker.tick().await;
				let Some(scheduler) = scheduler.upgrade() else {
					break;
				};
				match scheduler.check_and_cancel_expired().await {
					TickOutcome::Completed(summary) => {
						if !summary.cancelled.is_empty() || !summary.failures.is_empty() {
							tracing::info!(
								cancelled = summary.cancelled.len(),
								lost_races = summary.lost_races,
								failures = summary.failures.len(),
								"Payment-expiry check finished"
							);
						} else {
							tracing::debug!("Payment-expiry check found nothing to cancel");
						}
					}
					TickOutcome::Skipped => {
						tracing::debug!("Previous expiry check still running, tick skipped");
					}
					TickOutcome::QueryFailed(error) => {
						tracing::warn!(%error, "Expiry check failed, will retry next tick");
					}
				}
			}
		});

		*timer = Some(handle);
		tracing::info!(interval_secs = interval.as_secs(), "Payment-expiry scheduler started");
	}

	/// Stops the recurring expiry check. No-op when not started.
	pub fn stop(&self) {
		let mut timer = self.timer_guard();
		if let Some(handle) = timer.take() {
			handle.abort();
			tracing::info!("Payment-expiry scheduler stopped");
		}
	}

	/// Whether the timer is armed. Independent of whether a check is
	/// currently mid-flight.
	pub fn is_running(&self) -> bool {
		self.timer_guard().is_some()
	}

	fn timer_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
		match self.timer.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}
}

impl Drop for PaymentExpiryScheduler {
	fn drop(&mut self) {
		if let Some(handle) = self.timer_guard().take() {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::OrderStateError;
	use async_trait::async_trait;
	use chrono::{DateTime, Utc};
	use oms_storage::implementations::memory::MemoryStorage;
	use oms_storage::{OrderStore, StorageError, StorageService};
	use oms_types::{LineItem, ManualClock, Order, PaymentMethod, PaymentStatus};
	use std::sync::atomic::AtomicUsize;
	use tokio::sync::Notify;

	fn repository() -> Arc<OrderStore> {
		Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))))
	}

	fn bank_transfer_order(created_at: DateTime<Utc>) -> Order {
		Order::new(
			PaymentMethod::BankTransfer,
			vec![LineItem {
				product_ref: "sku-1".to_string(),
				variant_key: "42".to_string(),
				quantity: 1,
				unit_price: "10.00".parse().unwrap(),
			}],
			created_at,
		)
	}

	fn scheduler(
		repository: Arc<dyn OrderRepository>,
		clock: Arc<dyn Clock>,
	) -> Arc<PaymentExpiryScheduler> {
		Arc::new(PaymentExpiryScheduler::new(
			repository,
			clock,
			SchedulerConfig::default(),
		))
	}

	#[tokio::test]
	async fn order_is_cancelled_only_after_the_timeout() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));
		let order = bank_transfer_order(clock.now());
		repository.insert(&order).await.unwrap();

		let scheduler = scheduler(repository.clone(), clock.clone());

		// 29 minutes in: untouched
		clock.advance(chrono::Duration::minutes(29));
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => assert!(summary.cancelled.is_empty()),
			other => panic!("unexpected outcome: {:?}", other),
		}
		assert_eq!(
			repository.get(&order.id).await.unwrap().status,
			OrderStatus::Pending
		);

		// 31 minutes in: cancelled with the configured note
		clock.advance(chrono::Duration::minutes(2));
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => {
				assert_eq!(summary.cancelled, vec![order.id.clone()])
			}
			other => panic!("unexpected outcome: {:?}", other),
		}

		let cancelled = repository.get(&order.id).await.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		let last = cancelled.status_history.last().unwrap();
		assert_eq!(last.status, OrderStatus::Cancelled);
		assert_eq!(last.note, "Auto-cancelled: payment timeout");
	}

	#[tokio::test]
	async fn only_orders_past_the_cutoff_are_cancelled() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));
		let cutoff = clock.now() - chrono::Duration::minutes(30);

		let expired = bank_transfer_order(cutoff - chrono::Duration::seconds(1));
		let fresh = bank_transfer_order(cutoff + chrono::Duration::seconds(1));
		repository.insert(&expired).await.unwrap();
		repository.insert(&fresh).await.unwrap();

		let scheduler = scheduler(repository.clone(), clock);
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => {
				assert_eq!(summary.cancelled, vec![expired.id.clone()])
			}
			other => panic!("unexpected outcome: {:?}", other),
		}

		assert_eq!(
			repository.get(&fresh.id).await.unwrap().status,
			OrderStatus::Pending
		);
	}

	#[tokio::test]
	async fn cod_orders_are_never_selected() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));

		let mut ancient = Order::new(PaymentMethod::Cod, vec![], clock.now());
		ancient.created_at = clock.now() - chrono::Duration::days(365);
		ancient.payment_status = PaymentStatus::Pending;
		repository.insert(&ancient).await.unwrap();

		let scheduler = scheduler(repository.clone(), clock);
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => assert!(summary.cancelled.is_empty()),
			other => panic!("unexpected outcome: {:?}", other),
		}
	}

	/// Repository whose query blocks until released, for exercising the
	/// overlap guard.
	struct BlockingRepository {
		queries: AtomicUsize,
		release: Notify,
	}

	#[async_trait]
	impl OrderRepository for BlockingRepository {
		async fn insert(&self, _order: &Order) -> Result<(), StorageError> {
			Ok(())
		}

		async fn get(&self, _order_id: &str) -> Result<Order, StorageError> {
			Err(StorageError::NotFound)
		}

		async fn find_expired_bank_transfers(
			&self,
			_cutoff: DateTime<Utc>,
		) -> Result<Vec<Order>, StorageError> {
			self.queries.fetch_add(1, Ordering::SeqCst);
			self.release.notified().await;
			Ok(Vec::new())
		}

		async fn update_if_unchanged(
			&self,
			_previous: &Order,
			_updated: &Order,
		) -> Result<bool, StorageError> {
			Ok(false)
		}
	}

	#[tokio::test]
	async fn overlapping_check_is_skipped_without_querying() {
		let repository = Arc::new(BlockingRepository {
			queries: AtomicUsize::new(0),
			release: Notify::new(),
		});
		let scheduler = scheduler(repository.clone(), Arc::new(ManualClock::new(Utc::now())));

		let first = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.check_and_cancel_expired().await })
		};

		// Wait until the first check is parked inside the query
		while repository.queries.load(Ordering::SeqCst) == 0 {
			tokio::task::yield_now().await;
		}

		// Second invocation returns immediately and issues no query
		let second = scheduler.check_and_cancel_expired().await;
		assert!(matches!(second, TickOutcome::Skipped));
		assert_eq!(repository.queries.load(Ordering::SeqCst), 1);

		repository.release.notify_one();
		let first = first.await.unwrap();
		assert!(matches!(first, TickOutcome::Completed(_)));

		// Flag released; the next check runs again
		repository.release.notify_one();
		let third = scheduler.check_and_cancel_expired().await;
		assert!(matches!(third, TickOutcome::Completed(_)));
		assert_eq!(repository.queries.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn confirmed_payment_is_never_overridden() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));

		let order = bank_transfer_order(clock.now() - chrono::Duration::minutes(45));
		repository.insert(&order).await.unwrap();

		// Payment confirmation lands before the expiry check persists
		let machine = OrderStateMachine::new(repository.clone(), clock.clone());
		machine
			.confirm_payment(&order.id, "Payment received")
			.await
			.unwrap();

		let scheduler = scheduler(repository.clone(), clock);
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => assert!(summary.cancelled.is_empty()),
			other => panic!("unexpected outcome: {:?}", other),
		}

		let current = repository.get(&order.id).await.unwrap();
		assert_eq!(current.status, OrderStatus::Confirmed);
		assert_eq!(current.status_history.len(), 2);
	}

	#[tokio::test]
	async fn racing_confirmation_and_cancellation_has_one_winner() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));

		let order = bank_transfer_order(clock.now() - chrono::Duration::minutes(45));
		repository.insert(&order).await.unwrap();

		let machine = OrderStateMachine::new(repository.clone(), clock.clone());
		let scheduler = scheduler(repository.clone(), clock);

		let (confirm, tick) = tokio::join!(
			machine.confirm_payment(&order.id, "Payment received"),
			scheduler.check_and_cancel_expired(),
		);

		let cancelled_by_tick = match tick {
			TickOutcome::Completed(summary) => summary.cancelled.contains(&order.id),
			other => panic!("unexpected outcome: {:?}", other),
		};

		// Exactly one of the two writers wins
		assert_ne!(confirm.is_ok(), cancelled_by_tick);

		let current = repository.get(&order.id).await.unwrap();
		match current.status {
			OrderStatus::Confirmed => assert!(confirm.is_ok()),
			OrderStatus::Cancelled => assert!(cancelled_by_tick),
			other => panic!("unexpected final status: {}", other),
		}
		// One new history entry, not two
		assert_eq!(current.status_history.len(), 2);
	}

	#[tokio::test]
	async fn cancelling_after_cancellation_fails_cleanly() {
		let repository = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));

		let order = bank_transfer_order(clock.now() - chrono::Duration::minutes(45));
		repository.insert(&order).await.unwrap();

		let scheduler = scheduler(repository.clone(), clock.clone());
		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => assert_eq!(summary.cancelled.len(), 1),
			other => panic!("unexpected outcome: {:?}", other),
		}

		// A late confirmation attempt hits the terminal-state check
		let machine = OrderStateMachine::new(repository.clone(), clock);
		let result = machine.confirm_payment(&order.id, "Payment received").await;
		assert!(matches!(
			result,
			Err(OrderStateError::InvalidTransition { .. })
		));
	}

	/// Repository that fails persists for one specific order and delegates
	/// everything else.
	struct FailingPersistRepository {
		inner: Arc<OrderStore>,
		fail_id: String,
	}

	#[async_trait]
	impl OrderRepository for FailingPersistRepository {
		async fn insert(&self, order: &Order) -> Result<(), StorageError> {
			self.inner.insert(order).await
		}

		async fn get(&self, order_id: &str) -> Result<Order, StorageError> {
			self.inner.get(order_id).await
		}

		async fn find_expired_bank_transfers(
			&self,
			cutoff: DateTime<Utc>,
		) -> Result<Vec<Order>, StorageError> {
			self.inner.find_expired_bank_transfers(cutoff).await
		}

		async fn update_if_unchanged(
			&self,
			previous: &Order,
			updated: &Order,
		) -> Result<bool, StorageError> {
			if previous.id == self.fail_id {
				return Err(StorageError::Backend("disk full".to_string()));
			}
			self.inner.update_if_unchanged(previous, updated).await
		}
	}

	#[tokio::test]
	async fn persist_failure_is_recorded_and_does_not_roll_back_the_batch() {
		let inner = repository();
		let clock = Arc::new(ManualClock::new(Utc::now()));

		let failing = bank_transfer_order(clock.now() - chrono::Duration::minutes(45));
		let succeeding = bank_transfer_order(clock.now() - chrono::Duration::minutes(45));
		inner.insert(&failing).await.unwrap();
		inner.insert(&succeeding).await.unwrap();

		let repository = Arc::new(FailingPersistRepository {
			inner: inner.clone(),
			fail_id: failing.id.clone(),
		});
		let scheduler = scheduler(repository, clock);

		match scheduler.check_and_cancel_expired().await {
			TickOutcome::Completed(summary) => {
				assert_eq!(summary.cancelled, vec![succeeding.id.clone()]);
				assert_eq!(summary.failures.len(), 1);
				assert_eq!(summary.failures[0].order_id, failing.id);
			}
			other => panic!("unexpected outcome: {:?}", other),
		}

		// The successful cancellation stays committed; the failed one is
		// untouched and will be retried on the next tick
		assert_eq!(
			inner.get(&succeeding.id).await.unwrap().status,
			OrderStatus::Cancelled
		);
		assert_eq!(
			inner.get(&failing.id).await.unwrap().status,
			OrderStatus::Pending
		);
	}

	/// Repository that counts queries and returns no candidates.
	struct CountingRepository {
		queries: AtomicUsize,
	}

	#[async_trait]
	impl OrderRepository for CountingRepository {
		async fn insert(&self, _order: &Order) -> Result<(), StorageError> {
			Ok(())
		}

		async fn get(&self, _order_id: &str) -> Result<Order, StorageError> {
			Err(StorageError::NotFound)
		}

		async fn find_expired_bank_transfers(
			&self,
			_cutoff: DateTime<Utc>,
		) -> Result<Vec<Order>, StorageError> {
			self.queries.fetch_add(1, Ordering::SeqCst);
			Ok(Vec::new())
		}

		async fn update_if_unchanged(
			&self,
			_previous: &Order,
			_updated: &Order,
		) -> Result<bool, StorageError> {
			Ok(false)
		}
	}

	#[tokio::test(start_paused = true)]
	async fn starting_twice_arms_a_single_timer() {
		let repository = Arc::new(CountingRepository {
			queries: AtomicUsize::new(0),
		});
		let scheduler = scheduler(repository.clone(), Arc::new(ManualClock::new(Utc::now())));

		scheduler.clone().start(Duration::from_secs(60));
		scheduler.clone().start(Duration::from_secs(60));
		assert!(scheduler.is_running());

		// Immediate check plus ticks at 60s and 120s; a duplicate timer
		// would double the count
		tokio::time::sleep(Duration::from_secs(125)).await;
		assert_eq!(repository.queries.load(Ordering::SeqCst), 3);

		scheduler.stop();
		assert!(!scheduler.is_running());

		tokio::time::sleep(Duration::from_secs(120)).await;
		assert_eq!(repository.queries.load(Ordering::SeqCst), 3);

		// Stopping again is a no-op
		scheduler.stop();
		assert!(!scheduler.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn dropping_the_scheduler_stops_the_timer() {
		let repository = Arc::new(CountingRepository {
			queries: AtomicUsize::new(0),
		});
		let scheduler = scheduler(repository.clone(), Arc::new(ManualClock::new(Utc::now())));

		scheduler.clone().start(Duration::from_secs(60));
		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(repository.queries.load(Ordering::SeqCst), 1);

		// Last handle gone without an explicit stop(); the timer dies with it
		drop(scheduler);
		tokio::time::sleep(Duration::from_secs(180)).await;
		assert_eq!(repository.queries.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn query_failure_does_not_stop_the_timer() {
		struct FailingRepository {
			queries: AtomicUsize,
		}

		#[async_trait]
		impl OrderRepository for FailingRepository {
			async fn insert(&self, _order: &Order) -> Result<(), StorageError> {
				Ok(())
			}

			async fn get(&self, _order_id: &str) -> Result<Order, StorageError> {
				Err(StorageError::NotFound)
			}

			async fn find_expired_bank_transfers(
				&self,
				_cutoff: DateTime<Utc>,
			) -> Result<Vec<Order>, StorageError> {
				self.queries.fetch_add(1, Ordering::SeqCst);
				Err(StorageError::Backend("connection reset".to_string()))
			}

			async fn update_if_unchanged(
				&self,
				_previous: &Order,
				_updated: &Order,
			) -> Result<bool, StorageError> {
				Ok(false)
			}
		}

		let repository = Arc::new(FailingRepository {
			queries: AtomicUsize::new(0),
		});
		let scheduler = scheduler(repository.clone(), Arc::new(ManualClock::new(Utc::now())));

		scheduler.clone().start(Duration::from_secs(60));
		tokio::time::sleep(Duration::from_secs(125)).await;

		// Every tick ran despite the failures, and the flag never stuck
		assert_eq!(repository.queries.load(Ordering::SeqCst), 3);
		assert!(scheduler.is_running());
		scheduler.stop();
	}
}
