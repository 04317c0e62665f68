//! Injectable time source.
//!
//! TTL checks (blob cache mtimes, freshness windows, daily quota keys) all
//! need a notion of "now" that tests can pin. Production code uses
//! [`SystemClock`]; tests use [`FixedClock`] so a 90-day TTL boundary can be
//! exercised without sleeping.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync + std::fmt::Debug {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that returns a fixed instant until explicitly advanced.
#[derive(Debug)]
pub struct FixedClock {
	millis: AtomicI64,
}

impl FixedClock {
	pub fn new(at: DateTime<Utc>) -> Self {
		Self {
			millis: AtomicI64::new(at.timestamp_millis()),
		}
	}

	pub fn advance(&self, delta: chrono::Duration) {
		self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
	}

	pub fn set(&self, at: DateTime<Utc>) {
		self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
	}
}

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).expect("valid timestamp")
	}
}
