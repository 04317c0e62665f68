//! Shared Prometheus registry plumbing. Each crate registers its own
//! counters/histograms into a [`Registry`] handed to it at construction
//! time rather than reaching for a process-wide singleton, so tests can
//! build disposable registries.

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Mutex;

/// Wraps a `Registry` behind a mutex so it can be shared across the
/// cascade, providers, and store without every caller needing `&mut`.
#[derive(Default)]
pub struct SharedRegistry(Mutex<Registry>);

impl SharedRegistry {
	pub fn new() -> Self {
		Self(Mutex::new(Registry::default()))
	}

	pub fn with<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
		let mut guard = self.0.lock().expect("registry mutex poisoned");
		f(&mut guard)
	}

	/// Render all registered metrics in the Prometheus text exposition
	/// format, for a `/metrics` endpoint owned by the (out-of-scope) CLI.
	pub fn render(&self) -> String {
		let mut buf = String::new();
		let guard = self.0.lock().expect("registry mutex poisoned");
		encode(&mut buf, &guard).expect("encoding to a String never fails");
		buf
	}
}
