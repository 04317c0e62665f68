//! Password prevalence via a k-anonymity hash-prefix range API (§4.K.3).
//! The whole bucket response for a 5-char prefix is cached once and
//! answers every password that shares it.

use crate::ProviderError;
use crate::stats::Counters;
use cowrie_enrich_cache::BlobCache;
use cowrie_enrich_ratelimit::RateLimiter;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;

const SERVICE: &str = "hash-prefix";
const SERVICE_UNKNOWN: &str = "hash-prefix-unknown";
const PREFIX_LEN: usize = 5;

pub struct PasswordHashPrefixClient {
	http: reqwest::Client,
	endpoint: String,
	cache: Arc<BlobCache>,
	limiter: RateLimiter,
	counters: Counters,
}

impl PasswordHashPrefixClient {
	pub fn new(http: reqwest::Client, endpoint: impl Into<String>, cache: Arc<BlobCache>, limiter: RateLimiter) -> Self {
		Self {
			http,
			endpoint: endpoint.into(),
			cache,
			limiter,
			counters: Counters::default(),
		}
	}

	pub fn stats(&self) -> std::collections::HashMap<&'static str, u64> {
		self.counters.snapshot()
	}

	/// Returns the prevalence count for `password`, or `0` if the suffix
	/// doesn't appear in its bucket.
	pub async fn prevalence(&self, password: &str) -> Result<u32, ProviderError> {
		self.counters.incr("lookups");
		let digest = sha1_hex(password.as_bytes());
		let (prefix, suffix) = digest.split_at(PREFIX_LEN);

		let bucket = self.bucket(prefix).await?;
		Ok(bucket.get(&suffix.to_ascii_uppercase()).copied().unwrap_or(0))
	}

	async fn bucket(&self, prefix: &str) -> Result<HashMap<String, u32>, ProviderError> {
		if let Ok(Some(cached)) = self.cache.load_json::<HashMap<String, u32>>(SERVICE, prefix) {
			self.counters.incr("cache_hits");
			return Ok(cached);
		}
		if let Ok(Some(())) = self.cache.load_json::<()>(SERVICE_UNKNOWN, prefix) {
			self.counters.incr("cache_hits");
			return Ok(HashMap::new());
		}
		self.counters.incr("cache_misses");

		self.limiter.acquire().await;
		let url = format!("{}/range/{}", self.endpoint, prefix.to_ascii_uppercase());
		let response = self.http.get(&url).send().await.map_err(|e| ProviderError::Transient {
			provider: "hash-prefix",
			detail: e.to_string(),
		})?;
		if !response.status().is_success() {
			return Err(ProviderError::Transient {
				provider: "hash-prefix",
				detail: format!("status {}", response.status()),
			});
		}
		let text = response.text().await.map_err(|e| ProviderError::Malformed {
			provider: "hash-prefix",
			detail: e.to_string(),
		})?;

		let bucket = parse_range_response(&text);
		if bucket.is_empty() {
			self.cache.store_json(SERVICE_UNKNOWN, prefix, &());
		} else {
			self.cache.store_json(SERVICE, prefix, &bucket);
		}
		self.counters.incr("successes");
		Ok(bucket)
	}
}

fn sha1_hex(bytes: &[u8]) -> String {
	let mut hasher = Sha1::new();
	hasher.update(bytes);
	hex::encode_upper(hasher.finalize())
}

fn parse_range_response(text: &str) -> HashMap<String, u32> {
	text.lines()
		.filter_map(|line| line.split_once(':'))
		.filter_map(|(suffix, count)| count.trim().parse::<u32>().ok().map(|count| (suffix.to_string(), count)))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_range_response() {
		let body = "1E4C9B93F3F0682250B6CF8331B7EE68FD8:3\n003D68EB55068C33ACE09247EE4C639306B:12345\n";
		let bucket = parse_range_response(body);
		assert_eq!(bucket.get("1E4C9B93F3F0682250B6CF8331B7EE68FD8"), Some(&3));
		assert_eq!(bucket.len(), 2);
	}

	#[test]
	fn sha1_hex_is_uppercase() {
		let digest = sha1_hex(b"password");
		assert_eq!(digest.len(), 40);
		assert_eq!(digest, digest.to_ascii_uppercase());
	}
}
