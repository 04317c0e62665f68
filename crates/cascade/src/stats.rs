//! §4.G.5: thread-safe counters for the cascade's own bookkeeping,
//! separate from the provider-level counters each client keeps for
//! itself.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CascadeStats {
	total_processed: AtomicU64,
	cache_hits: AtomicU64,
	errors: AtomicU64,
	per_source_hits: Mutex<HashMap<&'static str, u64>>,
	per_source_timings: Mutex<HashMap<&'static str, Vec<Duration>>>,
	asn_created: AtomicU64,
	asn_updated: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct CascadeStatsSnapshot {
	pub total_processed: u64,
	pub cache_hits: u64,
	pub errors: u64,
	pub per_source_hits: HashMap<&'static str, u64>,
	pub per_source_avg_timing: HashMap<&'static str, Duration>,
	pub asn_created: u64,
	pub asn_updated: u64,
}

impl CascadeStats {
	pub fn record_processed(&self) {
		self.total_processed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_error(&self) {
		self.errors.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_source_hit(&self, source: &'static str) {
		*self.per_source_hits.lock().entry(source).or_insert(0) += 1;
	}

	pub fn record_source_timing(&self, source: &'static str, elapsed: Duration) {
		self.per_source_timings.lock().entry(source).or_default().push(elapsed);
	}

	pub fn record_asn_created(&self) {
		self.asn_created.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_asn_updated(&self) {
		self.asn_updated.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> CascadeStatsSnapshot {
		let timings = self.per_source_timings.lock();
		let per_source_avg_timing = timings
			.iter()
			.map(|(source, samples)| {
				let total: Duration = samples.iter().sum();
				let avg = total.checked_div(samples.len() as u32).unwrap_or_default();
				(*source, avg)
			})
			.collect();
		CascadeStatsSnapshot {
			total_processed: self.total_processed.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			errors: self.errors.load(Ordering::Relaxed),
			per_source_hits: self.per_source_hits.lock().clone(),
			per_source_avg_timing,
			asn_created: self.asn_created.load(Ordering::Relaxed),
			asn_updated: self.asn_updated.load(Ordering::Relaxed),
		}
	}
}
