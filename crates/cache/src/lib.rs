//! Hierarchical filesystem blob cache shared by the ASN whois, scanner
//! reputation, file reputation, and password-prevalence providers. Each
//! provider gets its own namespace (`service`) with an independent TTL;
//! entries are plain files keyed by the SHA-256 digest of an opaque string
//! key so providers never have to think about filesystem-safe encoding.

mod config;
mod shard;
mod stats;

pub use config::{CacheConfig, ServiceTtl};
pub use shard::ShardStrategy;
pub use stats::{CacheSnapshot, ServiceCounts};

use cowrie_enrich_core::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("io error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

pub struct BlobCache {
	root: PathBuf,
	config: CacheConfig,
	clock: Arc<dyn Clock>,
	stats: stats::Stats,
}

impl BlobCache {
	pub fn new(root: impl Into<PathBuf>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			root: root.into(),
			config,
			clock,
			stats: stats::Stats::default(),
		}
	}

	pub fn snapshot(&self) -> CacheSnapshot {
		self.stats.snapshot()
	}

	/// Store a JSON-serializable value under `(service, key)`. Best-effort:
	/// IO failures are logged and swallowed, never returned to the caller.
	pub fn store_json<T: Serialize>(&self, service: &str, key: &str, value: &T) {
		let bytes = match serde_json::to_vec(value) {
			Ok(b) => b,
			Err(e) => {
				warn!(service, key, error = %e, "failed to serialize cache payload");
				return;
			}
		};
		self.store_bytes(service, key, &bytes);
	}

	/// Store a raw byte payload under `(service, key)`. Best-effort, same
	/// contract as [`Self::store_json`].
	pub fn store_bytes(&self, service: &str, key: &str, bytes: &[u8]) {
		let path = self.primary_path(service, key);
		if let Some(parent) = path.parent() {
			if let Err(e) = fs::create_dir_all(parent) {
				warn!(service, key, path = %path.display(), error = %e, "failed to create cache directory");
				self.stats.record_error(service);
				return;
			}
		}
		match fs::write(&path, bytes) {
			Ok(()) => {
				debug!(service, key, path = %path.display(), "stored cache entry");
				self.stats.record_store(service);
			}
			Err(e) => {
				warn!(service, key, path = %path.display(), error = %e, "failed to write cache entry");
				self.stats.record_error(service);
			}
		}
	}

	/// Load and deserialize a JSON value previously stored under
	/// `(service, key)`. Expired or missing entries return `Ok(None)`.
	/// Corrupt payloads also return `Ok(None)` but increment the error
	/// counter; only IO failures other than "not found" are returned as
	/// `Err`.
	pub fn load_json<T: DeserializeOwned>(&self, service: &str, key: &str) -> Result<Option<T>, CacheError> {
		match self.load_bytes(service, key)? {
			Some(bytes) => match serde_json::from_slice(&bytes) {
				Ok(value) => Ok(Some(value)),
				Err(source) => {
					self.stats.record_error(service);
					warn!(service, key, error = %source, "cache entry failed to parse");
					Ok(None)
				}
			},
			None => Ok(None),
		}
	}

	/// Load a raw byte payload. See [`Self::load_json`] for the miss/error
	/// contract.
	pub fn load_bytes(&self, service: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		let ttl = self.config.ttl_for(service);
		for path in self.candidate_paths(service, key) {
			match self.read_if_fresh(&path, ttl)? {
				Some(bytes) => {
					if path != self.primary_path(service, key) {
						self.migrate(&path, service, key, &bytes);
					}
					self.stats.record_hit(service);
					return Ok(Some(bytes));
				}
				None => continue,
			}
		}
		self.stats.record_miss(service);
		Ok(None)
	}

	fn candidate_paths(&self, service: &str, key: &str) -> Vec<PathBuf> {
		let strategy = self.config.strategy_for(service);
		shard::candidate_paths(&self.root, service, key, strategy)
	}

	fn primary_path(&self, service: &str, key: &str) -> PathBuf {
		let strategy = self.config.strategy_for(service);
		shard::primary_path(&self.root, service, key, strategy)
	}

	fn read_if_fresh(&self, path: &Path, ttl: Option<StdDuration>) -> Result<Option<Vec<u8>>, CacheError> {
		let metadata = match fs::metadata(path) {
			Ok(m) => m,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(source) => {
				return Err(CacheError::Io {
					path: path.to_path_buf(),
					source,
				});
			}
		};
		if let Some(ttl) = ttl {
			let age = self.age_of(&metadata);
			if age >= ttl {
				let _ = fs::remove_file(path);
				return Ok(None);
			}
		}
		match fs::read(path) {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(CacheError::Io {
				path: path.to_path_buf(),
				source,
			}),
		}
	}

	fn age_of(&self, metadata: &fs::Metadata) -> StdDuration {
		let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
		let modified_utc: chrono::DateTime<chrono::Utc> = modified.into();
		let now = self.clock.now();
		(now - modified_utc).to_std().unwrap_or(StdDuration::ZERO)
	}

	fn migrate(&self, legacy: &Path, service: &str, key: &str, bytes: &[u8]) {
		debug!(service, key, from = %legacy.display(), "migrating legacy cache entry to primary path");
		self.store_bytes(service, key, bytes);
		let _ = fs::remove_file(legacy);
	}

	/// Walk every configured service directory and delete entries whose
	/// mtime has exceeded that service's TTL. Services with a non-positive
	/// (zero) TTL are skipped entirely.
	pub fn cleanup_expired(&self) -> CleanupReport {
		let mut report = CleanupReport::default();
		for service in self.config.service_names() {
			let ttl = match self.config.ttl_for(&service) {
				Some(ttl) if !ttl.is_zero() => ttl,
				_ => continue,
			};
			let dir = self.root.join(&service);
			self.sweep_dir(&dir, ttl, &mut report);
		}
		report
	}

	fn sweep_dir(&self, dir: &Path, ttl: StdDuration, report: &mut CleanupReport) {
		let entries = match fs::read_dir(dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return,
			Err(_) => {
				report.errors += 1;
				return;
			}
		};
		for entry in entries.flatten() {
			let path = entry.path();
			if path.is_dir() {
				self.sweep_dir(&path, ttl, report);
				continue;
			}
			report.scanned += 1;
			let metadata = match entry.metadata() {
				Ok(m) => m,
				Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
				Err(_) => {
					report.errors += 1;
					continue;
				}
			};
			if self.age_of(&metadata) >= ttl {
				match fs::remove_file(&path) {
					Ok(()) => report.deleted += 1,
					Err(e) if e.kind() == io::ErrorKind::NotFound => {}
					Err(_) => report.errors += 1,
				}
			}
		}
	}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
	pub scanned: u64,
	pub deleted: u64,
	pub errors: u64,
}
