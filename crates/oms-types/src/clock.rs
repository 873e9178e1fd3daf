//! Time source abstraction.
//!
//! All lifecycle timestamps and the payment-expiry cutoff go through a
//! `Clock` so tests can control time instead of sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// A source of the current time.
pub trait Clock: Send + Sync {
	/// Returns the current time.
	fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
	/// Creates a clock frozen at the given instant.
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(start),
		}
	}

	/// Moves the clock forward.
	pub fn advance(&self, by: Duration) {
		let mut now = match self.now.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		*now += by;
	}

	/// Sets the clock to an absolute instant.
	pub fn set(&self, to: DateTime<Utc>) {
		let mut now = match self.now.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		*now = to;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		match self.now.lock() {
			Ok(guard) => *guard,
			Err(poisoned) => *poisoned.into_inner(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn manual_clock_advances() {
		let start = Utc::now();
		let clock = ManualClock::new(start);
		assert_eq!(clock.now(), start);

		clock.advance(Duration::minutes(31));
		assert_eq!(clock.now(), start + Duration::minutes(31));
	}
}
