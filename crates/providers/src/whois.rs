//! Resolves IP → ASN attribution via Team Cymru's DNS TXT service, falling
//! back to the bulk whois-over-TCP protocol for batches or when DNS fails
//! outright (§4.E). Bulk TCP is the *only* permitted path for batch
//! lookups; issuing many individual queries against either backend is
//! what gets an operator's address range null-routed upstream.

use crate::ProviderError;
use crate::stats::Counters;
use cowrie_enrich_cache::BlobCache;
use cowrie_enrich_ratelimit::RateLimiter;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const BULK_BATCH_SIZE: usize = 500;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const DEFAULT_WHOIS_PORT: u16 = 43;
const SERVICE: &str = "whois-asn";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisResult {
	pub asn: u32,
	pub asn_org: Option<String>,
	pub country: Option<String>,
	pub registry: Option<String>,
	pub prefix: Option<String>,
	pub allocated: Option<String>,
}

/// Either the real DNS/bulk-TCP client or (test-only) a canned table of
/// literal responses, mirroring the `Live`/`NoOp` split on
/// [`ScannerReputationClient`](crate::ScannerReputationClient).
pub enum AsnWhoisClient {
	Network(NetworkClient),
	#[cfg(feature = "test-support")]
	Fixed(std::collections::HashMap<IpAddr, WhoisResult>),
	/// Always fails, simulating a dead upstream without needing real
	/// DNS/TCP infrastructure to refuse a connection.
	#[cfg(feature = "test-support")]
	Erroring,
}

impl AsnWhoisClient {
	pub fn new(resolver: TokioAsyncResolver, cache: std::sync::Arc<BlobCache>, limiter: RateLimiter, whois_host: impl Into<String>) -> Self {
		AsnWhoisClient::Network(NetworkClient::new(resolver, cache, limiter, whois_host))
	}

	/// Same as [`Self::new`], but against a non-standard whois port. Used by
	/// tests to point the bulk-TCP path at a local listener instead of the
	/// real (privileged) port 43.
	pub fn with_port(resolver: TokioAsyncResolver, cache: std::sync::Arc<BlobCache>, limiter: RateLimiter, whois_host: impl Into<String>, whois_port: u16) -> Self {
		AsnWhoisClient::Network(NetworkClient::with_port(resolver, cache, limiter, whois_host, whois_port))
	}

	/// Test-only constructor: `lookup`/`lookup_bulk` answer from `results`
	/// with no DNS resolution or TCP I/O.
	#[cfg(feature = "test-support")]
	pub fn with_fixed(results: std::collections::HashMap<IpAddr, WhoisResult>) -> Self {
		AsnWhoisClient::Fixed(results)
	}

	#[cfg(feature = "test-support")]
	pub fn with_error() -> Self {
		AsnWhoisClient::Erroring
	}

	pub fn stats(&self) -> std::collections::HashMap<&'static str, u64> {
		match self {
			AsnWhoisClient::Network(client) => client.stats(),
			#[cfg(feature = "test-support")]
			AsnWhoisClient::Fixed(_) | AsnWhoisClient::Erroring => std::collections::HashMap::new(),
		}
	}

	/// DNS-first, whois-TCP-fallback single lookup, through the blob cache.
	pub async fn lookup(&self, ip: IpAddr) -> Result<Option<WhoisResult>, ProviderError> {
		match self {
			AsnWhoisClient::Network(client) => client.lookup(ip).await,
			#[cfg(feature = "test-support")]
			AsnWhoisClient::Fixed(results) => Ok(results.get(&ip).cloned()),
			#[cfg(feature = "test-support")]
			AsnWhoisClient::Erroring => Err(ProviderError::Transient {
				provider: "whois-asn",
				detail: "simulated upstream failure".to_string(),
			}),
		}
	}

	/// Bulk whois over TCP, the only sanctioned path for batch queries.
	/// Chunks `ips` into groups of [`BULK_BATCH_SIZE`].
	pub async fn lookup_bulk(&self, ips: &[IpAddr]) -> Result<Vec<(IpAddr, Option<WhoisResult>)>, ProviderError> {
		match self {
			AsnWhoisClient::Network(client) => client.lookup_bulk(ips).await,
			#[cfg(feature = "test-support")]
			AsnWhoisClient::Fixed(results) => Ok(ips.iter().map(|ip| (*ip, results.get(ip).cloned())).collect()),
			#[cfg(feature = "test-support")]
			AsnWhoisClient::Erroring => Err(ProviderError::Transient {
				provider: "whois-asn",
				detail: "simulated upstream failure".to_string(),
			}),
		}
	}
}

pub struct NetworkClient {
	resolver: TokioAsyncResolver,
	cache: std::sync::Arc<BlobCache>,
	limiter: RateLimiter,
	whois_host: String,
	whois_port: u16,
	counters: Counters,
}

impl NetworkClient {
	pub fn new(resolver: TokioAsyncResolver, cache: std::sync::Arc<BlobCache>, limiter: RateLimiter, whois_host: impl Into<String>) -> Self {
		Self::with_port(resolver, cache, limiter, whois_host, DEFAULT_WHOIS_PORT)
	}

	pub fn with_port(resolver: TokioAsyncResolver, cache: std::sync::Arc<BlobCache>, limiter: RateLimiter, whois_host: impl Into<String>, whois_port: u16) -> Self {
		Self {
			resolver,
			cache,
			limiter,
			whois_host: whois_host.into(),
			whois_port,
			counters: Counters::default(),
		}
	}

	pub fn stats(&self) -> std::collections::HashMap<&'static str, u64> {
		self.counters.snapshot()
	}

	async fn lookup(&self, ip: IpAddr) -> Result<Option<WhoisResult>, ProviderError> {
		self.counters.incr("lookups");
		let key = ip.to_string();
		if let Ok(Some(cached)) = self.cache.load_json::<WhoisResult>(SERVICE, &key) {
			self.counters.incr("cache_hits");
			return Ok(Some(cached));
		}
		self.counters.incr("cache_misses");

		self.limiter.acquire().await;
		match self.lookup_dns(ip).await {
			Ok(Some(result)) => {
				self.counters.incr("dns_success");
				self.cache.store_json(SERVICE, &key, &result);
				return Ok(Some(result));
			}
			Ok(None) => {
				self.counters.incr("dns_success");
				return Ok(None);
			}
			Err(_) => self.counters.incr("dns_failure"),
		}

		let batch = self.lookup_bulk(&[ip]).await?;
		Ok(batch.into_iter().next().and_then(|(_, r)| r))
	}

	async fn lookup_dns(&self, ip: IpAddr) -> Result<Option<WhoisResult>, ProviderError> {
		let query = reversed_origin_query(ip);
		let mut delay = Duration::from_secs(1);
		for attempt in 0..=MAX_RETRIES {
			match self.resolver.txt_lookup(query.clone()).await {
				Ok(response) => {
					let record = response.iter().next();
					let Some(record) = record else { return Ok(None) };
					let text = record.iter().map(|b| String::from_utf8_lossy(b)).collect::<String>();
					return Ok(parse_origin_txt(&text));
				}
				Err(e) if is_terminal_dns_error(&e) => return Ok(None),
				Err(e) => {
					if attempt == MAX_RETRIES {
						return Err(ProviderError::Transient {
							provider: "whois-asn-dns",
							detail: e.to_string(),
						});
					}
					tokio::time::sleep(delay).await;
					delay *= 2;
				}
			}
		}
		Ok(None)
	}

	async fn lookup_bulk(&self, ips: &[IpAddr]) -> Result<Vec<(IpAddr, Option<WhoisResult>)>, ProviderError> {
		let mut results = Vec::with_capacity(ips.len());
		for chunk in ips.chunks(BULK_BATCH_SIZE) {
			self.limiter.acquire_n(chunk.len() as f64).await;
			let chunk_results = self.bulk_query_with_retry(chunk).await?;
			for (ip, result) in &chunk_results {
				if let Some(r) = result {
					self.cache.store_json(SERVICE, &ip.to_string(), r);
				}
			}
			results.extend(chunk_results);
		}
		Ok(results)
	}

	async fn bulk_query_with_retry(&self, ips: &[IpAddr]) -> Result<Vec<(IpAddr, Option<WhoisResult>)>, ProviderError> {
		let mut delay = Duration::from_secs(1);
		let mut last_err = None;
		for attempt in 0..=MAX_RETRIES {
			match self.bulk_query_once(ips).await {
				Ok(results) => {
					self.counters.incr("bulk_success");
					return Ok(results);
				}
				Err(e) => {
					last_err = Some(e);
					if attempt < MAX_RETRIES {
						tokio::time::sleep(delay).await;
						delay *= 2;
					}
				}
			}
		}
		self.counters.incr("bulk_failure");
		Err(last_err.unwrap_or(ProviderError::Transient {
			provider: "whois-asn-bulk",
			detail: "exhausted retries".to_string(),
		}))
	}

	async fn bulk_query_once(&self, ips: &[IpAddr]) -> Result<Vec<(IpAddr, Option<WhoisResult>)>, ProviderError> {
		let mut stream = tokio::time::timeout(SOCKET_TIMEOUT, TcpStream::connect((self.whois_host.as_str(), self.whois_port)))
			.await
			.map_err(|_| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: "connect timed out".to_string(),
			})?
			.map_err(|e| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: e.to_string(),
			})?;

		let mut request = String::from("begin\nverbose\n");
		for ip in ips {
			request.push_str(&ip.to_string());
			request.push('\n');
		}
		request.push_str("end\n");

		tokio::time::timeout(SOCKET_TIMEOUT, stream.write_all(request.as_bytes()))
			.await
			.map_err(|_| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: "write timed out".to_string(),
			})?
			.map_err(|e| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: e.to_string(),
			})?;

		let mut raw = String::new();
		tokio::time::timeout(SOCKET_TIMEOUT, stream.read_to_string(&mut raw))
			.await
			.map_err(|_| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: "read timed out".to_string(),
			})?
			.map_err(|e| ProviderError::Transient {
				provider: "whois-asn-bulk",
				detail: e.to_string(),
			})?;

		Ok(parse_bulk_response(&raw))
	}
}

fn reversed_origin_query(ip: IpAddr) -> String {
	match ip {
		IpAddr::V4(v4) => {
			let octets = v4.octets();
			format!("{}.{}.{}.{}.origin.asn.cymru.com", octets[3], octets[2], octets[1], octets[0])
		}
		IpAddr::V6(v6) => {
			let nibbles: String = v6
				.octets()
				.iter()
				.rev()
				.flat_map(|b| [b & 0x0f, b >> 4])
				.map(|nibble| format!("{nibble:x}."))
				.collect();
			format!("{nibbles}origin6.asn.cymru.com")
		}
	}
}

fn is_terminal_dns_error(err: &hickory_resolver::error::ResolveError) -> bool {
	use hickory_resolver::error::ResolveErrorKind;
	matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// Parses a Team Cymru origin TXT record:
/// `"ASN | prefix | country | registry | allocated"`.
fn parse_origin_txt(text: &str) -> Option<WhoisResult> {
	let fields: Vec<&str> = text.split('|').map(str::trim).collect();
	let asn_field = fields.first()?;
	if *asn_field == "NA" {
		return None;
	}
	let asn: u32 = asn_field.parse().ok()?;
	Some(WhoisResult {
		asn,
		asn_org: None,
		country: fields.get(2).map(|s| s.to_string()),
		registry: fields.get(3).map(|s| s.to_string()),
		prefix: fields.get(1).map(|s| s.to_string()),
		allocated: fields.get(4).map(|s| s.to_string()),
	})
}

/// Parses Team Cymru's bulk whois response, a header line followed by one
/// pipe-delimited record per IP:
/// `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.
fn parse_bulk_response(raw: &str) -> Vec<(IpAddr, Option<WhoisResult>)> {
	let mut out = Vec::new();
	for line in raw.lines().skip(1) {
		let fields: Vec<&str> = line.split('|').map(str::trim).collect();
		if fields.len() < 7 {
			continue;
		}
		let Ok(ip) = fields[1].parse::<IpAddr>() else { continue };
		let result = match fields[0].parse::<u32>() {
			Ok(asn) => Some(WhoisResult {
				asn,
				asn_org: Some(fields[6].to_string()),
				country: Some(fields[3].to_string()),
				registry: Some(fields[4].to_string()),
				prefix: Some(fields[2].to_string()),
				allocated: Some(fields[5].to_string()),
			}),
			Err(_) => None,
		};
		out.push((ip, result));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reversed_query_matches_cymru_convention() {
		let ip: IpAddr = "8.8.8.8".parse().unwrap();
		assert_eq!(reversed_origin_query(ip), "8.8.8.8.origin.asn.cymru.com");
	}

	#[test]
	fn parses_origin_txt_record() {
		let parsed = parse_origin_txt("15169 | 8.8.8.0/24 | US | arin | 1992-12-01").unwrap();
		assert_eq!(parsed.asn, 15169);
		assert_eq!(parsed.country.as_deref(), Some("US"));
	}

	#[test]
	fn unallocated_origin_record_is_absent() {
		assert!(parse_origin_txt("NA").is_none());
	}

	#[test]
	fn parses_bulk_response_skipping_header() {
		let raw = "AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name\n15169 | 8.8.8.8 | 8.8.8.0/24 | US | arin | 1992-12-01 | GOOGLE\n";
		let parsed = parse_bulk_response(raw);
		assert_eq!(parsed.len(), 1);
		let (ip, result) = &parsed[0];
		assert_eq!(*ip, "8.8.8.8".parse::<IpAddr>().unwrap());
		assert_eq!(result.as_ref().unwrap().asn, 15169);
	}

	/// Scenario 6 (bulk whois chunking): a local TCP listener stands in for
	/// Team Cymru's bulk whois service and records how many `begin`..`end`
	/// requests it receives and how many IP lines each one carries.
	#[tokio::test]
	async fn lookup_bulk_chunks_at_the_batch_size_boundary() {
		use tokio::net::TcpListener;

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let server = tokio::spawn(async move {
			let mut request_line_counts = Vec::new();
			for _ in 0..2 {
				let (mut socket, _) = listener.accept().await.unwrap();
				let mut buf = Vec::new();
				loop {
					let mut chunk = [0u8; 4096];
					let n = socket.read(&mut chunk).await.unwrap();
					if n == 0 {
						break;
					}
					buf.extend_from_slice(&chunk[..n]);
					if buf.ends_with(b"end\n") {
						break;
					}
				}
				let text = String::from_utf8(buf).unwrap();
				let ip_lines = text.lines().filter(|l| *l != "begin" && *l != "verbose" && *l != "end").count();
				request_line_counts.push(ip_lines);

				let mut response = String::from("AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name\n");
				for line in text.lines().filter(|l| *l != "begin" && *l != "verbose" && *l != "end") {
					response.push_str(&format!("15169 | {line} | 8.0.0.0/8 | US | arin | 1992-01-01 | GOOGLE\n"));
				}
				socket.write_all(response.as_bytes()).await.unwrap();
				socket.shutdown().await.unwrap();
			}
			request_line_counts
		});

		let resolver = TokioAsyncResolver::tokio(Default::default(), Default::default());
		let dir = tempfile::tempdir().unwrap();
		let cache = std::sync::Arc::new(BlobCache::new(
			dir.path(),
			cowrie_enrich_cache::CacheConfig::empty(),
			std::sync::Arc::new(cowrie_enrich_core::FixedClock::new(chrono::Utc::now())),
		));
		let client = AsnWhoisClient::with_port(resolver, cache, RateLimiter::unlimited(), addr.ip().to_string(), addr.port());

		let ips: Vec<IpAddr> = (0u32..750).map(|i| IpAddr::V4(std::net::Ipv4Addr::from(0x0A000000 + i))).collect();
		let results = client.lookup_bulk(&ips).await.unwrap();
		assert_eq!(results.len(), 750);

		let request_line_counts = server.await.unwrap();
		assert_eq!(request_line_counts, vec![500, 250]);
		assert!(request_line_counts.iter().all(|&n| n <= BULK_BATCH_SIZE));
	}
}
