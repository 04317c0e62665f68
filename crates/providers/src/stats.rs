//! Generic named-counter bag. Each client owns one and exposes its own
//! typed accessors over it; kept generic here so every client doesn't
//! reinvent a mutexed `HashMap<String, u64>`.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Counters(Mutex<HashMap<&'static str, u64>>);

impl Counters {
	pub fn incr(&self, name: &'static str) {
		*self.0.lock().entry(name).or_insert(0) += 1;
	}

	pub fn get(&self, name: &'static str) -> u64 {
		self.0.lock().get(name).copied().unwrap_or(0)
	}

	pub fn snapshot(&self) -> HashMap<&'static str, u64> {
		self.0.lock().clone()
	}
}
