//! §4.G.4 / §4.I: the staleness & backfill engine. Both operations are
//! restartable — every write underneath is an idempotent upsert, so a
//! crash mid-batch just means the next run re-does a little work, not
//! that it corrupts anything.

use crate::CascadeError;
use crate::freshness;
use chrono::Duration as ChronoDuration;
use cowrie_enrich_core::Clock;
use cowrie_enrich_core::net::parse_ip;
use cowrie_enrich_providers::{AsnWhoisClient, ScannerReputationClient};
use cowrie_enrich_store::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub enum RefreshSource {
	Whois,
	ScannerReputation,
	All,
}

pub struct StalenessEngine {
	store: Arc<Store>,
	whois: Arc<AsnWhoisClient>,
	reputation: Arc<ScannerReputationClient>,
	clock: Arc<dyn Clock>,
}

impl StalenessEngine {
	pub fn new(store: Arc<Store>, whois: Arc<AsnWhoisClient>, reputation: Arc<ScannerReputationClient>, clock: Arc<dyn Clock>) -> Self {
		Self { store, whois, reputation, clock }
	}

	/// Selects up to `limit` rows with `current_asn IS NULL` and patches
	/// each via whois. Failures are skipped, not retried inline — the next
	/// run picks them back up. Returns the count patched.
	pub async fn backfill_missing_asns(&self, limit: i64) -> Result<u64, CascadeError> {
		let rows = self.store.ip_inventory().missing_asn(limit).await?;
		let mut patched = 0u64;
		for row in rows {
			let ip = match parse_ip(&row.ip_address) {
				Ok(ip) => ip,
				Err(_) => continue,
			};
			match self.whois.lookup(ip).await {
				Ok(Some(result)) => {
					let now = self.clock.now();
					let asn = result.asn as i64;
					self.store
						.asn_inventory()
						.ensure_asn(asn, result.asn_org.as_deref(), result.country.as_deref(), result.registry.as_deref())
						.await?;
					self.store
						.ip_inventory()
						.patch_sub_object(&row.ip_address, "whois", serde_json::to_value(&result).unwrap_or(Value::Null), now)
						.await?;
					self.store.ip_inventory().set_current_asn(&row.ip_address, Some(asn), now).await?;
					patched += 1;
				}
				Ok(None) => {}
				Err(e) => warn!(ip = %row.ip_address, error = %e, "backfill whois lookup failed, skipping"),
			}
		}
		Ok(patched)
	}

	/// Refreshes whatever sources `source` names. Returns per-source
	/// counts of rows actually refreshed.
	pub async fn refresh_stale_data(&self, source: RefreshSource, limit: i64) -> Result<HashMap<&'static str, u64>, CascadeError> {
		let mut counts = HashMap::new();
		if matches!(source, RefreshSource::Whois | RefreshSource::All) {
			counts.insert("whois", self.refresh_whois(limit).await?);
		}
		if matches!(source, RefreshSource::ScannerReputation | RefreshSource::All) {
			counts.insert("scanner-reputation", self.refresh_scanner_reputation(limit).await?);
		}
		Ok(counts)
	}

	async fn refresh_whois(&self, limit: i64) -> Result<u64, CascadeError> {
		let ttl = ChronoDuration::days(freshness::WHOIS_TTL_DAYS);
		let rows = self.store.ip_inventory().stale_for_source("whois", ttl, self.clock.now(), limit).await?;
		let mut refreshed = 0u64;
		for row in rows {
			let ip = match parse_ip(&row.ip_address) {
				Ok(ip) => ip,
				Err(_) => continue,
			};
			match self.whois.lookup(ip).await {
				Ok(Some(result)) => {
					let now = self.clock.now();
					let new_asn = result.asn as i64;
					if row.current_asn != Some(new_asn) {
						self.store.ip_asn_history().append(&row.ip_address, new_asn, "whois", now).await?;
					}
					self.store
						.asn_inventory()
						.ensure_asn(new_asn, result.asn_org.as_deref(), result.country.as_deref(), result.registry.as_deref())
						.await?;
					self.store
						.ip_inventory()
						.patch_sub_object(&row.ip_address, "whois", serde_json::to_value(&result).unwrap_or(Value::Null), now)
						.await?;
					self.store.ip_inventory().set_current_asn(&row.ip_address, Some(new_asn), now).await?;
					refreshed += 1;
				}
				Ok(None) => {}
				Err(e) => warn!(ip = %row.ip_address, error = %e, "whois refresh failed, skipping"),
			}
		}
		Ok(refreshed)
	}

	async fn refresh_scanner_reputation(&self, limit: i64) -> Result<u64, CascadeError> {
		let ttl = ChronoDuration::days(freshness::SCANNER_REPUTATION_TTL_DAYS);
		let rows = self.store.ip_inventory().stale_for_source("scanner-reputation", ttl, self.clock.now(), limit).await?;
		let mut refreshed = 0u64;
		for row in rows {
			let ip = match parse_ip(&row.ip_address) {
				Ok(ip) => ip,
				Err(_) => continue,
			};
			match self.reputation.lookup(ip).await {
				Ok(Some(result)) => {
					let now = self.clock.now();
					self.store
						.ip_inventory()
						.patch_sub_object(&row.ip_address, "scanner-reputation", serde_json::to_value(&result).unwrap_or(Value::Null), now)
						.await?;
					refreshed += 1;
				}
				Ok(None) => {}
				Err(e) => warn!(ip = %row.ip_address, error = %e, "scanner reputation refresh failed, skipping"),
			}
		}
		Ok(refreshed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use cowrie_enrich_core::FixedClock;
	use cowrie_enrich_providers::{AsnWhoisClient, ScannerReputationClient, WhoisResult};
	use cowrie_enrich_store::test_support::migrated;
	use serde_json::json;
	use std::collections::HashMap;

	/// §8 scenario 5: refreshing a stale whois entry that changes the ASN
	/// writes the new `current_asn`, appends an `IPASNHistory` row, and
	/// leaves any session snapshot taken before the refresh untouched.
	#[sqlx::test(migrations = false)]
	async fn stale_whois_refresh_changes_asn_and_preserves_old_snapshots(pool: sqlx::PgPool) {
		let pool = migrated(pool).await;
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
		let store = Arc::new(Store::new(pool, clock.clone()));
		let now = clock.now();
		let stale_at = now - ChronoDuration::days(95);

		store
			.ip_inventory()
			.insert_new("203.0.113.1", Some(4134), Some(stale_at), json!({"whois": {"asn": 4134}}), "v1", stale_at)
			.await
			.unwrap();

		store.sessions().ensure_started("sess-before-refresh", Some("203.0.113.1"), stale_at).await.unwrap();
		store
			.sessions()
			.capture_snapshot("sess-before-refresh", Some(4134), Some("CN"), None, json!({"whois": {"asn": 4134}}), stale_at)
			.await
			.unwrap();

		let mut whois_table: HashMap<std::net::IpAddr, WhoisResult> = HashMap::new();
		whois_table.insert(
			"203.0.113.1".parse().unwrap(),
			WhoisResult {
				asn: 4837,
				asn_org: Some("CHINA169-BACKBONE".to_string()),
				country: None,
				registry: Some("APNIC".to_string()),
				prefix: None,
				allocated: None,
			},
		);
		let whois = Arc::new(AsnWhoisClient::with_fixed(whois_table));
		let reputation = Arc::new(ScannerReputationClient::no_op());

		let engine = StalenessEngine::new(store.clone(), whois, reputation, clock);
		let counts = engine.refresh_stale_data(RefreshSource::Whois, 1).await.unwrap();
		assert_eq!(counts.get("whois").copied(), Some(1));

		let row = store.ip_inventory().find("203.0.113.1").await.unwrap().unwrap();
		assert_eq!(row.current_asn, Some(4837));

		let history = store.ip_asn_history().for_ip("203.0.113.1").await.unwrap();
		assert!(history.iter().any(|h| h.asn_number == 4837 && h.verification_source == "whois"));

		let session = store.sessions().find("sess-before-refresh").await.unwrap().unwrap();
		assert_eq!(session.snapshot_asn, Some(4134));
	}
}
