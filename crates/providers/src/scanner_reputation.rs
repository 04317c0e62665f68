//! A free-tier scanner/noise reputation client (§4.F). Degrades to a
//! permanent no-op when credentials can't be resolved or the upstream
//! rejects them, and self-throttles against a daily UTC quota tracked in
//! the blob cache.

use crate::ProviderError;
use crate::stats::Counters;
use cowrie_enrich_cache::BlobCache;
use cowrie_enrich_core::Clock;
use cowrie_enrich_ratelimit::RateLimiter;
use cowrie_enrich_secrets::Secret;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

const SERVICE: &str = "scanner-reputation";
const DEFAULT_DAILY_QUOTA: u32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationResult {
	pub is_scanner: bool,
	pub is_riot: bool,
	pub classification: String,
	pub name: Option<String>,
	pub last_seen: Option<String>,
}

/// Either a live client or a substitute that always answers absent and
/// records every call as a failure — the "graceful degradation" path
/// the cascade's step 4 relies on.
pub enum ScannerReputationClient {
	Live(LiveClient),
	NoOp(Counters),
}

impl ScannerReputationClient {
	pub fn live(
		http: reqwest::Client,
		base_url: impl Into<String>,
		secret: Secret,
		cache: Arc<BlobCache>,
		limiter: RateLimiter,
		clock: Arc<dyn Clock>,
		daily_quota: u32,
	) -> Self {
		ScannerReputationClient::Live(LiveClient {
			http,
			base_url: base_url.into(),
			secret,
			cache,
			limiter,
			clock,
			daily_quota,
			disabled: AtomicBool::new(false),
			counters: Counters::default(),
		})
	}

	pub fn no_op() -> Self {
		ScannerReputationClient::NoOp(Counters::default())
	}

	pub async fn lookup(&self, ip: IpAddr) -> Result<Option<ReputationResult>, ProviderError> {
		match self {
			ScannerReputationClient::Live(client) => client.lookup(ip).await,
			ScannerReputationClient::NoOp(counters) => {
				counters.incr("failures");
				Ok(None)
			}
		}
	}

	pub fn remaining_quota(&self) -> Option<u32> {
		match self {
			ScannerReputationClient::Live(client) => Some(client.remaining_quota()),
			ScannerReputationClient::NoOp(_) => None,
		}
	}

	pub fn stats(&self) -> std::collections::HashMap<&'static str, u64> {
		match self {
			ScannerReputationClient::Live(client) => client.counters.snapshot(),
			ScannerReputationClient::NoOp(counters) => counters.snapshot(),
		}
	}
}

pub struct LiveClient {
	http: reqwest::Client,
	base_url: String,
	secret: Secret,
	cache: Arc<BlobCache>,
	limiter: RateLimiter,
	clock: Arc<dyn Clock>,
	daily_quota: u32,
	disabled: AtomicBool,
	counters: Counters,
}

impl LiveClient {
	fn quota_key(&self) -> String {
		format!("quota:{}", self.clock.now().format("%Y-%m-%d"))
	}

	fn remaining_quota(&self) -> u32 {
		let used: Option<u32> = self.cache.load_json(SERVICE, &self.quota_key()).ok().flatten();
		self.daily_quota.saturating_sub(used.unwrap_or(0))
	}

	fn record_usage(&self) {
		let used: u32 = self.cache.load_json(SERVICE, &self.quota_key()).ok().flatten().unwrap_or(0);
		self.cache.store_json(SERVICE, &self.quota_key(), &(used + 1));
	}

	pub async fn lookup(&self, ip: IpAddr) -> Result<Option<ReputationResult>, ProviderError> {
		self.counters.incr("lookups");

		if self.disabled.load(Ordering::SeqCst) {
			self.counters.incr("failures");
			return Ok(None);
		}

		let key = ip.to_string();
		if let Ok(Some(cached)) = self.cache.load_json::<ReputationResult>(SERVICE, &key) {
			self.counters.incr("cache_hits");
			return Ok(Some(cached));
		}
		self.counters.incr("cache_misses");

		if self.remaining_quota() == 0 {
			self.counters.incr("quota_exceeded");
			return Ok(None);
		}

		self.limiter.acquire().await;
		self.record_usage();

		let url = format!("{}/v3/community/{ip}", self.base_url);
		let mut delay = Duration::from_millis(500);
		for attempt in 0..=2 {
			let response = self
				.http
				.get(&url)
				.header("key", self.secret.expose())
				.send()
				.await
				.map_err(|e| ProviderError::Transient {
					provider: "scanner-reputation",
					detail: e.to_string(),
				})?;

			match response.status().as_u16() {
				200 => {
					let body: ApiResponse = response.json().await.map_err(|e| ProviderError::Malformed {
						provider: "scanner-reputation",
						detail: e.to_string(),
					})?;
					let result = body.into_result();
					self.cache.store_json(SERVICE, &key, &result);
					self.counters.incr("successes");
					return Ok(Some(result));
				}
				404 => {
					let result = ReputationResult {
						is_scanner: false,
						is_riot: false,
						classification: "unknown".to_string(),
						name: None,
						last_seen: None,
					};
					self.cache.store_json(SERVICE, &key, &result);
					self.counters.incr("successes");
					return Ok(Some(result));
				}
				401 => {
					self.disabled.store(true, Ordering::SeqCst);
					self.counters.incr("auth_failures");
					warn!("scanner-reputation credentials rejected, disabling client");
					return Err(ProviderError::Auth { provider: "scanner-reputation" });
				}
				429 if attempt < 2 => {
					self.counters.incr("rate_limited");
					tokio::time::sleep(delay).await;
					delay *= 2;
					continue;
				}
				429 => {
					self.counters.incr("rate_limited");
					return Ok(None);
				}
				other => {
					self.counters.incr("failures");
					return Err(ProviderError::Transient {
						provider: "scanner-reputation",
						detail: format!("unexpected status {other}"),
					});
				}
			}
		}
		Ok(None)
	}
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
	noise: bool,
	riot: bool,
	classification: Option<String>,
	name: Option<String>,
	last_seen: Option<String>,
}

impl ApiResponse {
	fn into_result(self) -> ReputationResult {
		ReputationResult {
			is_scanner: self.noise,
			is_riot: self.riot,
			classification: self.classification.unwrap_or_else(|| "unknown".to_string()),
			name: self.name,
			last_seen: self.last_seen,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use cowrie_enrich_cache::CacheConfig;
	use cowrie_enrich_core::FixedClock;
	use cowrie_enrich_secrets::SecretResolver;
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn test_secret() -> Secret {
		unsafe { std::env::set_var("COWRIE_ENRICH_TEST_SR_KEY", "test-key") };
		let secret = SecretResolver::new().resolve("env:COWRIE_ENRICH_TEST_SR_KEY").unwrap();
		unsafe { std::env::remove_var("COWRIE_ENRICH_TEST_SR_KEY") };
		secret
	}

	fn test_client(server: &MockServer, dir: &std::path::Path, daily_quota: u32) -> ScannerReputationClient {
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
		let cache = Arc::new(BlobCache::new(dir, CacheConfig::empty(), clock.clone()));
		ScannerReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), cache, RateLimiter::unlimited(), clock, daily_quota)
	}

	#[tokio::test]
	async fn known_scanner_is_parsed() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v3/community/1.2.3.4"))
			.and(header("key", "test-key"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"noise": true,
				"riot": false,
				"classification": "scanner",
				"name": "censys",
				"last_seen": "2026-01-01",
			})))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let client = test_client(&server, dir.path(), 100);
		let result = client.lookup("1.2.3.4".parse().unwrap()).await.unwrap().unwrap();
		assert!(result.is_scanner);
		assert_eq!(result.classification, "scanner");
	}

	#[tokio::test]
	async fn unknown_ip_maps_404_to_unknown_classification() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).and(path("/v3/community/5.6.7.8")).respond_with(ResponseTemplate::new(404)).expect(1).mount(&server).await;

		let dir = tempfile::tempdir().unwrap();
		let client = test_client(&server, dir.path(), 100);
		let result = client.lookup("5.6.7.8".parse().unwrap()).await.unwrap().unwrap();
		assert!(!result.is_scanner);
		assert_eq!(result.classification, "unknown");
	}

	#[tokio::test]
	async fn auth_rejection_disables_client_permanently() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).and(path("/v3/community/9.9.9.9")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

		let dir = tempfile::tempdir().unwrap();
		let client = test_client(&server, dir.path(), 100);
		assert!(client.lookup("9.9.9.9".parse().unwrap()).await.is_err());

		// Second call never reaches the mock: client disabled itself.
		let result = client.lookup("9.9.9.9".parse().unwrap()).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn exhausted_quota_short_circuits_without_a_request() {
		let server = MockServer::start().await;
		// No mock registered: any request would fail the test via an unmatched-request panic.
		let dir = tempfile::tempdir().unwrap();
		let client = test_client(&server, dir.path(), 0);
		let result = client.lookup("1.1.1.1".parse().unwrap()).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn no_op_client_always_reports_absent() {
		let client = ScannerReputationClient::no_op();
		assert!(client.lookup("1.1.1.1".parse().unwrap()).await.unwrap().is_none());
		assert!(client.remaining_quota().is_none());
	}
}
