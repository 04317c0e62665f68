//! `IPInventory`: created on first observation, updated on every
//! cache-miss enrichment. The insert path races concurrent cascades on
//! the same IP; callers are expected to retry through [`IpInventoryRepo::find`]
//! on a [`StoreError::Conflict`] (§4.G.1 step 7).

use crate::StoreError;
use crate::models::IpInventory;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct IpInventoryRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> IpInventoryRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn find(&self, ip_address: &str) -> Result<Option<IpInventory>, StoreError> {
		sqlx::query_as::<_, IpInventory>("SELECT * FROM ip_inventory WHERE ip_address = $1")
			.bind(ip_address)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}

	/// Insert a brand-new row. `first_seen = last_seen = now`, `session_count = 1`.
	/// On a lost unique-constraint race, returns `StoreError::Conflict` — the
	/// caller re-reads via [`Self::find`] and treats the competing row as the
	/// answer (§4.G.1 step 7), it does not retry the insert itself.
	pub async fn insert_new(
		&self,
		ip_address: &str,
		current_asn: Option<i64>,
		asn_last_verified: Option<DateTime<Utc>>,
		enrichment: serde_json::Value,
		enrichment_version: &str,
		now: DateTime<Utc>,
	) -> Result<IpInventory, StoreError> {
		sqlx::query_as::<_, IpInventory>(
			r#"
			INSERT INTO ip_inventory
				(ip_address, current_asn, asn_last_verified, first_seen, last_seen, session_count, enrichment, enrichment_updated_at, enrichment_version)
			VALUES ($1, $2, $3, $4, $4, 1, $5, $4, $6)
			RETURNING *
			"#,
		)
		.bind(ip_address)
		.bind(current_asn)
		.bind(asn_last_verified)
		.bind(now)
		.bind(enrichment)
		.bind(enrichment_version)
		.fetch_one(self.pool)
		.await
		.map_err(|e| StoreError::from_sqlx("ip_inventory", e))
	}

	/// Update an existing row in place: replace `enrichment` wholesale
	/// (§4.G.2 — sub-objects are never field-merged), bump `session_count`,
	/// advance `last_seen`, and set `current_asn` to the merge winner.
	pub async fn update_existing(
		&self,
		ip_address: &str,
		current_asn: Option<i64>,
		asn_last_verified: Option<DateTime<Utc>>,
		enrichment: serde_json::Value,
		now: DateTime<Utc>,
	) -> Result<IpInventory, StoreError> {
		sqlx::query_as::<_, IpInventory>(
			r#"
			UPDATE ip_inventory SET
				current_asn = $2,
				asn_last_verified = COALESCE($3, asn_last_verified),
				last_seen = $4,
				session_count = session_count + 1,
				enrichment = $5,
				enrichment_updated_at = $4
			WHERE ip_address = $1
			RETURNING *
			"#,
		)
		.bind(ip_address)
		.bind(current_asn)
		.bind(asn_last_verified)
		.bind(now)
		.bind(enrichment)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	/// A fresh row served from cache (§8 scenario 3): bump `session_count`
	/// and advance `last_seen`, touching nothing else — no provider ran, so
	/// `enrichment` and `current_asn` stay exactly as they were.
	pub async fn touch_cache_hit(&self, ip_address: &str, now: DateTime<Utc>) -> Result<IpInventory, StoreError> {
		sqlx::query_as::<_, IpInventory>(
			r#"
			UPDATE ip_inventory SET
				session_count = session_count + 1,
				last_seen = $2
			WHERE ip_address = $1
			RETURNING *
			"#,
		)
		.bind(ip_address)
		.bind(now)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	/// The staleness engine's whois-refresh path: overwrite `current_asn`
	/// in place (temporal history lives in `IPASNHistory`, not here).
	pub async fn set_current_asn(&self, ip_address: &str, asn: Option<i64>, now: DateTime<Utc>) -> Result<(), StoreError> {
		sqlx::query("UPDATE ip_inventory SET current_asn = $2, asn_last_verified = $3 WHERE ip_address = $1")
			.bind(ip_address)
			.bind(asn)
			.bind(now)
			.execute(self.pool)
			.await?;
		Ok(())
	}

	/// Patch a single provider's sub-object without disturbing the rest of
	/// `enrichment` (used by `backfill_missing_asns`/`refresh_stale_data`,
	/// §4.G.4). JSONB concatenation keeps the write a single round trip
	/// and naturally marks the column dirty for replication/CDC readers.
	pub async fn patch_sub_object(&self, ip_address: &str, provider: &str, sub_object: serde_json::Value, now: DateTime<Utc>) -> Result<(), StoreError> {
		sqlx::query(
			r#"
			UPDATE ip_inventory SET
				enrichment = enrichment || jsonb_build_object($2::text, $3::jsonb),
				enrichment_updated_at = $4
			WHERE ip_address = $1
			"#,
		)
		.bind(ip_address)
		.bind(provider)
		.bind(sub_object)
		.bind(now)
		.execute(self.pool)
		.await?;
		Ok(())
	}

	pub async fn missing_asn(&self, limit: i64) -> Result<Vec<IpInventory>, StoreError> {
		sqlx::query_as::<_, IpInventory>("SELECT * FROM ip_inventory WHERE current_asn IS NULL ORDER BY last_seen ASC LIMIT $1")
			.bind(limit)
			.fetch_all(self.pool)
			.await
			.map_err(StoreError::from)
	}

	/// Rows whose `enrichment_updated_at` has crossed `ttl` *and* already
	/// carry a sub-object for `provider` (we only ever refresh what we
	/// previously had, §4.G.4).
	pub async fn stale_for_source(&self, provider: &str, ttl: chrono::Duration, now: DateTime<Utc>, limit: i64) -> Result<Vec<IpInventory>, StoreError> {
		let cutoff = now - ttl;
		sqlx::query_as::<_, IpInventory>(
			r#"
			SELECT * FROM ip_inventory
			WHERE enrichment_updated_at < $1
			  AND enrichment ? $2
			ORDER BY enrichment_updated_at ASC
			LIMIT $3
			"#,
		)
		.bind(cutoff)
		.bind(provider)
		.bind(limit)
		.fetch_all(self.pool)
		.await
		.map_err(StoreError::from)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::migrated;
	use serde_json::json;

	#[sqlx::test(migrations = false)]
	async fn insert_then_update_bumps_session_count_and_replaces_enrichment(pool: PgPool) {
		let pool = migrated(pool).await;
		let repo = IpInventoryRepo::new(&pool);
		let now = Utc::now();

		let inserted = repo.insert_new("8.8.8.8", Some(15169), Some(now), json!({"offline-geo": {"country": "US"}}), "v1", now).await.unwrap();
		assert_eq!(inserted.session_count, 1);
		assert_eq!(inserted.current_asn, Some(15169));

		let later = now + chrono::Duration::hours(1);
		let updated = repo
			.update_existing("8.8.8.8", Some(15169), Some(later), json!({"offline-geo": {"country": "US"}, "whois": {"country": "US"}}), later)
			.await
			.unwrap();
		assert_eq!(updated.session_count, 2);
		assert_eq!(updated.enrichment["whois"]["country"], "US");
	}

	/// Regression for the orchestrator's merge fix: `update_existing` writes
	/// through whatever `current_asn` it's handed — a `None` here really
	/// does clear the column, confirming the layer above (not this one) is
	/// what must decide "errored" vs "explicitly unallocated".
	#[sqlx::test(migrations = false)]
	async fn update_existing_writes_through_a_cleared_asn_verbatim(pool: PgPool) {
		let pool = migrated(pool).await;
		let repo = IpInventoryRepo::new(&pool);
		let now = Utc::now();

		repo.insert_new("203.0.113.1", Some(4134), Some(now), json!({}), "v1", now).await.unwrap();
		let cleared = repo.update_existing("203.0.113.1", None, None, json!({}), now).await.unwrap();
		assert_eq!(cleared.current_asn, None);
	}

	#[sqlx::test(migrations = false)]
	async fn missing_asn_lists_only_unresolved_rows(pool: PgPool) {
		let pool = migrated(pool).await;
		let repo = IpInventoryRepo::new(&pool);
		let now = Utc::now();

		repo.insert_new("1.1.1.1", Some(13335), Some(now), json!({}), "v1", now).await.unwrap();
		repo.insert_new("2.2.2.2", None, None, json!({}), "v1", now).await.unwrap();

		let missing = repo.missing_asn(10).await.unwrap();
		assert_eq!(missing.len(), 1);
		assert_eq!(missing[0].ip_address, "2.2.2.2");
	}
}
