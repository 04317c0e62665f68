//! §4.G: the cascade orchestrator. Coordinates the offline geo/ASN client,
//! the whois client, and the scanner-reputation client to produce or
//! refresh one `IPInventory` row.

use crate::CascadeError;
use crate::freshness;
use crate::stats::{CascadeStats, CascadeStatsSnapshot};
use chrono::{DateTime, Utc};
use cowrie_enrich_core::Clock;
use cowrie_enrich_providers::{AsnWhoisClient, OfflineGeoClient, ScannerReputationClient};
use cowrie_enrich_store::StoreError;
use cowrie_enrich_store::models::IpInventory;
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const ENRICHMENT_VERSION: &str = "v1";

/// What this cascade's ASN tracks (offline, then whois) settled on.
/// `current_asn` is only ever cleared on [`Unallocated`](AsnOutcome::Unallocated)
/// — both tracks explicitly reporting no ASN — never merely because a
/// lookup errored (§4.G.2, §3: "cleared only if both sources explicitly
/// return unallocated").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsnOutcome {
	Resolved(i64),
	Unallocated,
	Unknown,
}

pub struct CascadeOrchestrator {
	store: Arc<cowrie_enrich_store::Store>,
	offline: Arc<OfflineGeoClient>,
	whois: Arc<AsnWhoisClient>,
	reputation: Arc<ScannerReputationClient>,
	clock: Arc<dyn Clock>,
	stats: CascadeStats,
}

impl CascadeOrchestrator {
	pub fn new(
		store: Arc<cowrie_enrich_store::Store>,
		offline: Arc<OfflineGeoClient>,
		whois: Arc<AsnWhoisClient>,
		reputation: Arc<ScannerReputationClient>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			store,
			offline,
			whois,
			reputation,
			clock,
			stats: CascadeStats::default(),
		}
	}

	pub fn stats(&self) -> CascadeStatsSnapshot {
		self.stats.snapshot()
	}

	/// §4.G.1: probe, enrich, merge, write, and handle the insert race.
	/// Never cancelled — equivalent to [`Self::enrich_single_ip_cancellable`]
	/// with a token that's never triggered.
	pub async fn enrich_single_ip(&self, ip: IpAddr) -> Result<IpInventory, CascadeError> {
		self.enrich_single_ip_cancellable(ip, &CancellationToken::new()).await
	}

	/// Same as [`Self::enrich_single_ip`], but checked against `cancel` at
	/// each suspension-point boundary (§5). A cancellation mid-cascade
	/// discards any uncommitted work and returns `CascadeError::Cancelled`
	/// rather than a partial row; anything already written to the database
	/// stays written.
	pub async fn enrich_single_ip_cancellable(&self, ip: IpAddr, cancel: &CancellationToken) -> Result<IpInventory, CascadeError> {
		self.stats.record_processed();
		let ip_str = ip.to_string();
		let now = self.clock.now();

		let existing = match self.store.ip_inventory().find(&ip_str).await {
			Ok(row) => row,
			Err(e) => return self.any_failure_fallback(&ip_str, None, now, e).await,
		};

		if let Some(row) = &existing {
			let offline_age = self.offline.database_age().unwrap_or(Duration::from_secs(u64::MAX / 2));
			if freshness::is_fresh(row, now, offline_age) {
				self.stats.record_cache_hit();
				return Ok(self.store.ip_inventory().touch_cache_hit(&ip_str, now).await?);
			}
		}

		if cancel.is_cancelled() {
			return Err(CascadeError::Cancelled { ip: ip_str });
		}

		let (enrichment, asn_outcome) = self.collect_enrichment(ip, cancel).await?;

		if cancel.is_cancelled() {
			return Err(CascadeError::Cancelled { ip: ip_str });
		}

		// A transient failure on every ASN-bearing track is not an authoritative
		// "unallocated" answer — keep whatever ASN the row already carried.
		let resolved_asn = match asn_outcome {
			AsnOutcome::Resolved(asn) => Some(asn),
			AsnOutcome::Unallocated => None,
			AsnOutcome::Unknown => existing.as_ref().and_then(|row| row.current_asn),
		};

		let write_result = match &existing {
			Some(_) => self.store.ip_inventory().update_existing(&ip_str, resolved_asn, Some(now), enrichment.clone(), now).await,
			None => match self.store.ip_inventory().insert_new(&ip_str, resolved_asn, Some(now), enrichment.clone(), ENRICHMENT_VERSION, now).await {
				Err(StoreError::Conflict(_)) => {
					debug!(ip = %ip_str, "insert race lost, re-reading competing row");
					return self
						.store
						.ip_inventory()
						.find(&ip_str)
						.await?
						.ok_or_else(|| StoreError::NotFound(ip_str.clone()).into());
				}
				other => other,
			},
		};

		match write_result {
			Ok(row) => Ok(row),
			Err(e) => self.any_failure_fallback(&ip_str, existing, now, e).await,
		}
	}

	/// Steps 2–4: offline lookup, conditional whois fallback, and the
	/// independent scanner-reputation track. Every provider failure here
	/// is logged and swallowed — this is the "any exception: log and
	/// continue" degradation path, not the any-failure fallback (which
	/// only triggers on a store-level failure).
	async fn collect_enrichment(&self, ip: IpAddr, cancel: &CancellationToken) -> Result<(Value, AsnOutcome), CascadeError> {
		let mut merge = Map::new();
		let mut asn_outcome = AsnOutcome::Unknown;

		match self.offline.lookup(ip) {
			Ok(Some(result)) => {
				self.stats.record_source_hit("offline-geo");
				asn_outcome = match result.asn {
					Some(asn) => {
						self.ensure_asn(asn as i64, result.asn_org.as_deref(), result.country_code.as_deref(), None).await;
						AsnOutcome::Resolved(asn as i64)
					}
					None => AsnOutcome::Unallocated,
				};
				merge.insert("offline-geo".to_string(), serde_json::to_value(&result).unwrap_or(Value::Null));
			}
			Ok(None) => asn_outcome = AsnOutcome::Unallocated,
			Err(e) => {
				self.stats.record_error();
				warn!(ip = %ip, error = %e, "offline geo/ASN lookup failed");
			}
		}

		if cancel.is_cancelled() {
			return Err(CascadeError::Cancelled { ip: ip.to_string() });
		}

		// Whois only runs when offline didn't resolve an ASN, regardless of
		// whether that's because offline said "unallocated" or because it
		// errored — either way offline alone isn't enough to land on an ASN.
		if !matches!(asn_outcome, AsnOutcome::Resolved(_)) {
			match self.whois.lookup(ip).await {
				Ok(Some(result)) => {
					self.stats.record_source_hit("whois");
					self.ensure_asn(result.asn as i64, result.asn_org.as_deref(), result.country.as_deref(), result.registry.as_deref())
						.await;
					asn_outcome = AsnOutcome::Resolved(result.asn as i64);
					merge.insert("whois".to_string(), serde_json::to_value(&result).unwrap_or(Value::Null));
				}
				// Whois explicitly found nothing. That only makes the overall
				// outcome "unallocated" if offline was also an authoritative
				// answer — an offline error must not be overridden into a
				// clearable state by whois's unrelated absence.
				Ok(None) => {}
				Err(e) => {
					self.stats.record_error();
					warn!(ip = %ip, error = %e, "whois lookup failed");
					asn_outcome = AsnOutcome::Unknown;
				}
			}
		}

		if cancel.is_cancelled() {
			return Err(CascadeError::Cancelled { ip: ip.to_string() });
		}

		match self.reputation.lookup(ip).await {
			Ok(Some(result)) => {
				self.stats.record_source_hit("scanner-reputation");
				merge.insert("scanner-reputation".to_string(), serde_json::to_value(&result).unwrap_or(Value::Null));
			}
			Ok(None) => {}
			Err(e) => {
				self.stats.record_error();
				warn!(ip = %ip, error = %e, "scanner reputation lookup degraded");
			}
		}
		Ok((Value::Object(merge), asn_outcome))
	}

	/// §5: bounded-concurrency batch entry point. Runs up to
	/// `max_concurrent` cascades at once via a semaphore-gated `JoinSet`;
	/// a single IP's failure doesn't cancel its siblings. Results are
	/// returned in completion order, not input order.
	pub async fn enrich_many(self: &Arc<Self>, ips: Vec<IpAddr>, max_concurrent: usize, cancel: CancellationToken) -> Vec<(IpAddr, Result<IpInventory, CascadeError>)> {
		let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
		let mut set = JoinSet::new();
		for ip in ips {
			let orchestrator = Arc::clone(self);
			let semaphore = Arc::clone(&semaphore);
			let cancel = cancel.clone();
			set.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
				let result = orchestrator.enrich_single_ip_cancellable(ip, &cancel).await;
				(ip, result)
			});
		}

		let mut results = Vec::new();
		while let Some(joined) = set.join_next().await {
			match joined {
				Ok(pair) => results.push(pair),
				Err(e) => warn!(error = %e, "cascade task panicked"),
			}
		}
		results
	}

	async fn ensure_asn(&self, asn: i64, org_name: Option<&str>, org_country: Option<&str>, rir: Option<&str>) {
		let existed = matches!(self.store.asn_inventory().find(asn).await, Ok(Some(_)));
		match self.store.asn_inventory().ensure_asn(asn, org_name, org_country, rir).await {
			Ok(_) => {
				if existed {
					self.stats.record_asn_updated();
				} else {
					self.stats.record_asn_created();
				}
			}
			Err(e) => {
				self.stats.record_error();
				warn!(asn, error = %e, "failed to upsert ASN inventory row");
			}
		}
	}

	/// §4.G.1 step 5: if the store itself failed (not a provider, which is
	/// already degraded gracefully above), return the cached row if one
	/// exists, otherwise synthesize and persist a minimal inventory row.
	async fn any_failure_fallback(&self, ip_str: &str, existing: Option<IpInventory>, now: DateTime<Utc>, cause: StoreError) -> Result<IpInventory, CascadeError> {
		warn!(ip = %ip_str, error = %cause, "cascade store operation failed, falling back");
		self.stats.record_error();
		if let Some(row) = existing {
			return Ok(row);
		}
		self.store
			.ip_inventory()
			.insert_new(ip_str, None, None, Value::Object(Map::new()), ENRICHMENT_VERSION, now)
			.await
			.map_err(CascadeError::from)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use cowrie_enrich_cache::{BlobCache, CacheConfig};
	use cowrie_enrich_core::FixedClock;
	use cowrie_enrich_providers::OfflineGeoClient;
	use cowrie_enrich_ratelimit::RateLimiter;
	use cowrie_enrich_secrets::SecretResolver;
	use cowrie_enrich_store::test_support::migrated;
	use std::collections::HashMap;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn test_secret() -> cowrie_enrich_secrets::Secret {
		unsafe { std::env::set_var("COWRIE_ENRICH_TEST_ORCH_KEY", "test-key") };
		let secret = SecretResolver::new().resolve("env:COWRIE_ENRICH_TEST_ORCH_KEY").unwrap();
		unsafe { std::env::remove_var("COWRIE_ENRICH_TEST_ORCH_KEY") };
		secret
	}

	fn offline_fixed(entries: Vec<(&str, cowrie_enrich_providers::OfflineResult)>) -> Arc<OfflineGeoClient> {
		let results: HashMap<IpAddr, cowrie_enrich_providers::OfflineResult> = entries.into_iter().map(|(ip, r)| (ip.parse::<IpAddr>().unwrap(), r)).collect();
		Arc::new(OfflineGeoClient::with_fixed(results, Duration::from_secs(2 * 24 * 3600)))
	}

	fn google_offline_result() -> cowrie_enrich_providers::OfflineResult {
		cowrie_enrich_providers::OfflineResult {
			country_code: Some("US".to_string()),
			country_name: Some("United States".to_string()),
			city: Some("Mountain View".to_string()),
			latitude: None,
			longitude: None,
			accuracy_radius_km: None,
			asn: Some(15169),
			asn_org: Some("GOOGLE".to_string()),
		}
	}

	/// §8 scenario 1: full cascade, clean data.
	#[sqlx::test(migrations = false)]
	async fn full_cascade_clean_data(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
		let store = Arc::new(cowrie_enrich_store::Store::new(pool, clock.clone()));

		let offline = offline_fixed(vec![("8.8.8.8", google_offline_result())]);
		let whois = Arc::new(AsnWhoisClient::with_error()); // must not be called

		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"noise": false, "riot": true, "classification": "benign", "name": "Google Public DNS",
			})))
			.expect(1)
			.mount(&server)
			.await;
		let dir = tempfile::tempdir().unwrap();
		let cache = Arc::new(BlobCache::new(dir.path(), CacheConfig::empty(), clock.clone()));
		let reputation = Arc::new(ScannerReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), cache, RateLimiter::unlimited(), clock.clone(), 10_000));

		let orchestrator = CascadeOrchestrator::new(store.clone(), offline, whois, reputation, clock);
		let row = orchestrator.enrich_single_ip("8.8.8.8".parse().unwrap()).await.unwrap();

		assert_eq!(row.current_asn, Some(15169));
		assert_eq!(row.geo_country(), "US");
		assert_eq!(row.ip_type(), None);
		assert!(!row.is_scanner());
		let keys: Vec<&String> = row.enrichment.as_object().unwrap().keys().collect();
		assert_eq!(keys.len(), 2);
		assert!(row.enrichment.get("offline-geo").is_some());
		assert!(row.enrichment.get("scanner-reputation").is_some());

		let asn = store.asn_inventory().find(15169).await.unwrap().unwrap();
		assert_eq!(asn.organization_name.as_deref(), Some("GOOGLE"));
	}

	/// §8 scenario 2: whois fallback when offline reports no ASN.
	#[sqlx::test(migrations = false)]
	async fn whois_fallback_when_offline_has_no_asn(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
		let store = Arc::new(cowrie_enrich_store::Store::new(pool, clock.clone()));

		let offline = offline_fixed(vec![(
			"203.0.113.1",
			cowrie_enrich_providers::OfflineResult {
				country_code: Some("CN".to_string()),
				country_name: None,
				city: None,
				latitude: None,
				longitude: None,
				accuracy_radius_km: None,
				asn: None,
				asn_org: None,
			},
		)]);
		let mut whois_table: HashMap<IpAddr, cowrie_enrich_providers::WhoisResult> = HashMap::new();
		whois_table.insert(
			"203.0.113.1".parse().unwrap(),
			cowrie_enrich_providers::WhoisResult {
				asn: 4134,
				asn_org: Some("CHINANET-BACKBONE".to_string()),
				country: None,
				registry: Some("APNIC".to_string()),
				prefix: None,
				allocated: None,
			},
		);
		let whois = Arc::new(AsnWhoisClient::with_fixed(whois_table));

		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"noise": true, "riot": false, "classification": "malicious",
			})))
			.expect(1)
			.mount(&server)
			.await;
		let dir = tempfile::tempdir().unwrap();
		let cache = Arc::new(BlobCache::new(dir.path(), CacheConfig::empty(), clock.clone()));
		let reputation = Arc::new(ScannerReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), cache, RateLimiter::unlimited(), clock.clone(), 10_000));

		let orchestrator = CascadeOrchestrator::new(store.clone(), offline, whois, reputation, clock);
		let row = orchestrator.enrich_single_ip("203.0.113.1".parse().unwrap()).await.unwrap();

		assert_eq!(row.current_asn, Some(4134));
		for key in ["offline-geo", "whois", "scanner-reputation"] {
			assert!(row.enrichment.get(key).is_some(), "missing {key}");
		}
		let asn = store.asn_inventory().find(4134).await.unwrap().unwrap();
		assert_eq!(asn.rir_registry.as_deref(), Some("APNIC"));
	}

	/// §8 scenario 3: a fresh row is a cache hit — no provider runs, and the
	/// row changes only by `session_count += 1` / `last_seen` advancing.
	#[sqlx::test(migrations = false)]
	async fn fresh_row_is_a_cache_hit(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let fixed_clock = Arc::new(FixedClock::new(Utc::now()));
		let clock: Arc<dyn Clock> = fixed_clock.clone();
		let store = Arc::new(cowrie_enrich_store::Store::new(pool, clock.clone()));
		let now = clock.now();

		store
			.ip_inventory()
			.insert_new(
				"1.1.1.1",
				Some(13335),
				Some(now),
				serde_json::json!({"offline-geo": {"country": "US"}, "scanner-reputation": {"classification": "benign"}}),
				"v1",
				now - chrono::Duration::days(1),
			)
			.await
			.unwrap();

		let offline = offline_fixed(vec![]); // database_age defaults to 2 days, below the 7-day TTL
		let whois = Arc::new(AsnWhoisClient::with_error()); // must not be called
		let reputation = Arc::new(ScannerReputationClient::no_op()); // must not be called beyond this no-op

		let orchestrator = CascadeOrchestrator::new(store.clone(), offline, whois, reputation, clock.clone());
		fixed_clock.advance(chrono::Duration::hours(1));
		let row = orchestrator.enrich_single_ip("1.1.1.1".parse().unwrap()).await.unwrap();

		assert_eq!(row.session_count, 2);
		assert_eq!(row.current_asn, Some(13335));
		assert_eq!(orchestrator.stats().cache_hits, 1);
	}

	/// §8 scenario 4: scanner-reputation quota already exhausted for today —
	/// offline still populates its sub-object, but no HTTP call is made and
	/// `enrichment` carries no `scanner-reputation` key.
	#[sqlx::test(migrations = false)]
	async fn quota_exhaustion_skips_reputation_without_a_request(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
		let store = Arc::new(cowrie_enrich_store::Store::new(pool, clock.clone()));
		let now = clock.now();

		let dir = tempfile::tempdir().unwrap();
		let cache = Arc::new(BlobCache::new(dir.path(), CacheConfig::empty(), clock.clone()));
		cache.store_json("scanner-reputation", &format!("quota:{}", now.format("%Y-%m-%d")), &10_000u32);

		let offline = offline_fixed(vec![("9.9.9.9", google_offline_result())]);
		let whois = Arc::new(AsnWhoisClient::with_error()); // offline resolved the ASN, must not be called
		// No mock registered: any request would be answered 404 and still
		// surface as a populated `scanner-reputation` sub-object, which the
		// assertion below would catch.
		let server = MockServer::start().await;
		let reputation = Arc::new(ScannerReputationClient::live(reqwest::Client::new(), server.uri(), test_secret(), cache, RateLimiter::unlimited(), clock.clone(), 10_000));

		let orchestrator = CascadeOrchestrator::new(store, offline, whois, reputation, clock);
		let row = orchestrator.enrich_single_ip("9.9.9.9".parse().unwrap()).await.unwrap();

		assert_eq!(row.current_asn, Some(15169));
		assert!(row.enrichment.get("scanner-reputation").is_none());
	}

	/// Regression for the merge-priority fix: when offline errors (not just
	/// reports an absent ASN) and whois also errors, `current_asn` must be
	/// left untouched rather than cleared to null.
	#[sqlx::test(migrations = false)]
	async fn transient_provider_failures_do_not_clear_a_known_asn(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
		let store = Arc::new(cowrie_enrich_store::Store::new(pool, clock.clone()));
		let now = clock.now();

		store
			.ip_inventory()
			.insert_new("5.5.5.5", Some(4837), Some(now), serde_json::json!({"offline-geo": {}}), "v1", now - chrono::Duration::days(30))
			.await
			.unwrap();

		// Points at a real but empty MaxMind directory: `lookup` errors
		// because the `.mmdb` files don't exist there, rather than
		// answering "no ASN" — the distinction this fix depends on.
		let dir = tempfile::tempdir().unwrap();
		let offline = Arc::new(OfflineGeoClient::new(dir.path()));
		let whois = Arc::new(AsnWhoisClient::with_error());
		let reputation = Arc::new(ScannerReputationClient::no_op());

		let orchestrator = CascadeOrchestrator::new(store.clone(), offline, whois, reputation, clock);
		let row = orchestrator.enrich_single_ip("5.5.5.5".parse().unwrap()).await.unwrap();

		assert_eq!(row.current_asn, Some(4837), "a transient lookup failure must not clear a previously known ASN");
	}
}
