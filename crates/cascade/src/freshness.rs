//! §4.G.3: a row is fresh only if every present sub-object is still
//! within its own TTL; a *missing* sub-object never forces a refresh on
//! its own (whois/scanner may have legitimately failed before), except
//! for offline-geo, which is cheap and required.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cowrie_enrich_store::models::IpInventory;
use std::time::Duration;

pub const WHOIS_TTL_DAYS: i64 = 90;
pub const SCANNER_REPUTATION_TTL_DAYS: i64 = 7;
pub const OFFLINE_GEO_TTL_DAYS: i64 = 7;

pub fn is_fresh(row: &IpInventory, now: DateTime<Utc>, offline_database_age: Duration) -> bool {
	if row.enrichment.as_object().is_none_or(|o| o.is_empty()) {
		return false;
	}

	let has_offline = row.enrichment.get("offline-geo").is_some();
	if !has_offline || offline_database_age > Duration::from_secs(OFFLINE_GEO_TTL_DAYS as u64 * 24 * 3600) {
		return false;
	}

	if row.enrichment.get("whois").is_some() {
		if !within(row.enrichment_updated_at, now, WHOIS_TTL_DAYS) {
			return false;
		}
	}

	if row.enrichment.get("scanner-reputation").is_some() && !within(row.enrichment_updated_at, now, SCANNER_REPUTATION_TTL_DAYS) {
		return false;
	}

	true
}

fn within(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl_days: i64) -> bool {
	match updated_at {
		Some(updated_at) => now - updated_at <= ChronoDuration::days(ttl_days),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn base_row(enrichment: serde_json::Value, enrichment_updated_at: Option<DateTime<Utc>>) -> IpInventory {
		IpInventory {
			ip_address: "1.2.3.4".to_string(),
			current_asn: None,
			asn_last_verified: None,
			first_seen: Utc::now(),
			last_seen: Utc::now(),
			session_count: 1,
			enrichment,
			enrichment_updated_at,
			enrichment_version: "v1".to_string(),
		}
	}

	#[test]
	fn empty_enrichment_is_never_fresh() {
		let row = base_row(json!({}), Some(Utc::now()));
		assert!(!is_fresh(&row, Utc::now(), Duration::from_secs(0)));
	}

	#[test]
	fn missing_offline_geo_forces_refresh_regardless_of_ttl() {
		let row = base_row(json!({"whois": {}}), Some(Utc::now()));
		assert!(!is_fresh(&row, Utc::now(), Duration::from_secs(0)));
	}

	#[test]
	fn missing_whois_does_not_force_refresh() {
		let row = base_row(json!({"offline-geo": {}}), Some(Utc::now()));
		assert!(is_fresh(&row, Utc::now(), Duration::from_secs(0)));
	}

	#[test]
	fn stale_whois_forces_refresh() {
		let old = Utc::now() - ChronoDuration::days(91);
		let row = base_row(json!({"offline-geo": {}, "whois": {}}), Some(old));
		assert!(!is_fresh(&row, Utc::now(), Duration::from_secs(0)));
	}

	#[test]
	fn stale_offline_database_forces_refresh() {
		let row = base_row(json!({"offline-geo": {}}), Some(Utc::now()));
		assert!(!is_fresh(&row, Utc::now(), Duration::from_secs(8 * 24 * 3600)));
	}
}
