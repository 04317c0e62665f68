//! File-reputation lookups by SHA-256 (§4.K): a JSON document per hash,
//! cached 30 days for a known verdict and 12 hours for an unknown one —
//! two distinct cache namespaces since the TTLs differ.

use crate::ProviderError;
use crate::stats::Counters;
use cowrie_enrich_cache::BlobCache;
use cowrie_enrich_ratelimit::RateLimiter;
use cowrie_enrich_secrets::Secret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SERVICE_KNOWN: &str = "file-reputation";
const SERVICE_UNKNOWN: &str = "file-reputation-unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReputationResult {
	pub classification: String,
	pub positive_ratio: f64,
	pub known: bool,
}

pub enum FileReputationClient {
	Live(LiveClient),
	NoOp(Counters),
}

impl FileReputationClient {
	pub fn live(http: reqwest::Client, base_url: impl Into<String>, secret: Secret, cache: Arc<BlobCache>, limiter: RateLimiter) -> Self {
		FileReputationClient::Live(LiveClient {
			http,
			base_url: base_url.into(),
			secret,
			cache,
			limiter,
			counters: Counters::default(),
		})
	}

	pub fn no_op() -> Self {
		FileReputationClient::NoOp(Counters::default())
	}

	pub async fn lookup(&self, sha256: &str) -> Result<Option<FileReputationResult>, ProviderError> {
		match self {
			FileReputationClient::Live(client) => client.lookup(sha256).await,
			FileReputationClient::NoOp(counters) => {
				counters.incr("failures");
				Ok(None)
			}
		}
	}
}

pub struct LiveClient {
	http: reqwest::Client,
	base_url: String,
	secret: Secret,
	cache: Arc<BlobCache>,
	limiter: RateLimiter,
	counters: Counters,
}

impl LiveClient {
	pub async fn lookup(&self, sha256: &str) -> Result<Option<FileReputationResult>, ProviderError> {
		self.counters.incr("lookups");

		if let Ok(Some(cached)) = self.cache.load_json::<FileReputationResult>(SERVICE_KNOWN, sha256) {
			self.counters.incr("cache_hits");
			return Ok(Some(cached));
		}
		if let Ok(Some(cached)) = self.cache.load_json::<FileReputationResult>(SERVICE_UNKNOWN, sha256) {
			self.counters.incr("cache_hits");
			return Ok(Some(cached));
		}
		self.counters.incr("cache_misses");

		self.limiter.acquire().await;
		let url = format!("{}/files/{sha256}", self.base_url);
		let response = self
			.http
			.get(&url)
			.header("x-apikey", self.secret.expose())
			.send()
			.await
			.map_err(|e| ProviderError::Transient {
				provider: "file-reputation",
				detail: e.to_string(),
			})?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			let result = FileReputationResult {
				classification: "unknown".to_string(),
				positive_ratio: 0.0,
				known: false,
			};
			self.cache.store_json(SERVICE_UNKNOWN, sha256, &result);
			self.counters.incr("successes");
			return Ok(Some(result));
		}
		if !response.status().is_success() {
			self.counters.incr("failures");
			return Err(ProviderError::Transient {
				provider: "file-reputation",
				detail: format!("status {}", response.status()),
			});
		}

		let body: ApiResponse = response.json().await.map_err(|e| ProviderError::Malformed {
			provider: "file-reputation",
			detail: e.to_string(),
		})?;
		let result = FileReputationResult {
			classification: body.classification,
			positive_ratio: body.positive_ratio,
			known: true,
		};
		self.cache.store_json(SERVICE_KNOWN, sha256, &result);
		self.counters.incr("successes");
		Ok(Some(result))
	}
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
	classification: String,
	positive_ratio: f64,
}

#[cfg(test)]
mod tests {
	use super::*;
	use cowrie_enrich_cache::{BlobCache, CacheConfig};
	use cowrie_enrich_core::SystemClock;
	use cowrie_enrich_ratelimit::RateLimiter;
	use cowrie_enrich_secrets::SecretResolver;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn test_secret() -> Secret {
		unsafe { std::env::set_var("COWRIE_ENRICH_TEST_VT_KEY", "test-key") };
		let secret = SecretResolver::new().resolve("env:COWRIE_ENRICH_TEST_VT_KEY").unwrap();
		unsafe { std::env::remove_var("COWRIE_ENRICH_TEST_VT_KEY") };
		secret
	}

	fn test_cache(root: &std::path::Path) -> Arc<BlobCache> {
		Arc::new(BlobCache::new(root, CacheConfig::empty(), Arc::new(SystemClock)))
	}

	#[tokio::test]
	async fn known_hash_is_parsed_and_cached() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/files/deadbeef"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"classification": "malicious",
				"positive_ratio": 0.8,
			})))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let client = FileReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), test_cache(dir.path()), RateLimiter::unlimited());

		let result = client.lookup("deadbeef").await.unwrap().unwrap();
		assert_eq!(result.classification, "malicious");
		assert!(result.known);

		// Second lookup hits the blob cache, not the mock server's single expectation.
		let cached = client.lookup("deadbeef").await.unwrap().unwrap();
		assert_eq!(cached.classification, "malicious");
	}

	#[tokio::test]
	async fn unknown_hash_maps_404_to_unknown_verdict() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/files/abc123"))
			.respond_with(ResponseTemplate::new(404))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let client = FileReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), test_cache(dir.path()), RateLimiter::unlimited());

		let result = client.lookup("abc123").await.unwrap().unwrap();
		assert!(!result.known);
		assert_eq!(result.classification, "unknown");
	}

	#[tokio::test]
	async fn no_op_client_always_reports_absent() {
		let client = FileReputationClient::no_op();
		assert!(client.lookup("deadbeef").await.unwrap().is_none());
	}
}
