//! Hit/miss/store/error counters, per service. Kept as a plain mutexed map
//! rather than wired into `prometheus-client` directly so `BlobCache` stays
//! usable without a registry in tests; the providers crate mirrors these
//! into counters it registers itself.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCounts {
	pub hits: u64,
	pub misses: u64,
	pub stores: u64,
	pub errors: u64,
}

#[derive(Debug, Default, Clone)]
pub struct CacheSnapshot {
	by_service: HashMap<String, ServiceCounts>,
}

impl CacheSnapshot {
	pub fn for_service(&self, service: &str) -> ServiceCounts {
		self.by_service.get(service).copied().unwrap_or_default()
	}

	pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceCounts)> {
		self.by_service.iter().map(|(k, v)| (k.as_str(), v))
	}
}

#[derive(Debug, Default)]
pub struct Stats {
	by_service: Mutex<HashMap<String, ServiceCounts>>,
}

impl Stats {
	pub fn record_hit(&self, service: &str) {
		self.with_mut(service, |c| c.hits += 1);
	}

	pub fn record_miss(&self, service: &str) {
		self.with_mut(service, |c| c.misses += 1);
	}

	pub fn record_store(&self, service: &str) {
		self.with_mut(service, |c| c.stores += 1);
	}

	pub fn record_error(&self, service: &str) {
		self.with_mut(service, |c| c.errors += 1);
	}

	fn with_mut(&self, service: &str, f: impl FnOnce(&mut ServiceCounts)) {
		let mut guard = self.by_service.lock();
		f(guard.entry(service.to_string()).or_default());
	}

	pub fn snapshot(&self) -> CacheSnapshot {
		CacheSnapshot {
			by_service: self.by_service.lock().clone(),
		}
	}
}
