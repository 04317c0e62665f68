//! `SessionSummary`: counters update on every event; the snapshot columns
//! (`snapshot_asn`, `snapshot_country`, `snapshot_ip_type`, `enrichment`,
//! `enrichment_at`) are write-once (§3, §4.J).

use crate::StoreError;
use crate::models::{IpInventory, SessionSummary};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct SessionRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> SessionRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn find(&self, session_id: &str) -> Result<Option<SessionSummary>, StoreError> {
		sqlx::query_as::<_, SessionSummary>("SELECT * FROM session_summaries WHERE session_id = $1")
			.bind(session_id)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}

	/// Materializes the row for a session's first event. Snapshot columns
	/// start null; they are populated once by [`Self::capture_snapshot`].
	pub async fn ensure_started(&self, session_id: &str, source_ip: Option<&str>, first_event_at: DateTime<Utc>) -> Result<SessionSummary, StoreError> {
		sqlx::query_as::<_, SessionSummary>(
			r#"
			INSERT INTO session_summaries (session_id, source_ip, first_event_at, last_event_at)
			VALUES ($1, $2, $3, $3)
			ON CONFLICT (session_id) DO UPDATE SET session_id = EXCLUDED.session_id
			RETURNING *
			"#,
		)
		.bind(session_id)
		.bind(source_ip)
		.bind(first_event_at)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	/// Bump counters and extend the time window; never touches the
	/// snapshot columns.
	#[allow(clippy::too_many_arguments)]
	pub async fn record_event(
		&self,
		session_id: &str,
		event_at: DateTime<Utc>,
		is_command: bool,
		is_download: bool,
		is_login_attempt: bool,
		is_ssh_key_injection: bool,
	) -> Result<(), StoreError> {
		sqlx::query(
			r#"
			UPDATE session_summaries SET
				event_count = event_count + 1,
				command_count = command_count + CASE WHEN $2 THEN 1 ELSE 0 END,
				file_download_count = file_download_count + CASE WHEN $3 THEN 1 ELSE 0 END,
				login_attempt_count = login_attempt_count + CASE WHEN $4 THEN 1 ELSE 0 END,
				ssh_key_injection_count = ssh_key_injection_count + CASE WHEN $5 THEN 1 ELSE 0 END,
				last_event_at = GREATEST(last_event_at, $6)
			WHERE session_id = $1
			"#,
		)
		.bind(session_id)
		.bind(is_command)
		.bind(is_download)
		.bind(is_login_attempt)
		.bind(is_ssh_key_injection)
		.bind(event_at)
		.execute(self.pool)
		.await?;
		Ok(())
	}

	/// Write the enrichment snapshot exactly once. If a snapshot already
	/// exists the `WHERE enrichment_at IS NULL` guard matches nothing and
	/// this returns the row unchanged, per the write-once invariant —
	/// callers must not assume this always overwrites.
	#[allow(clippy::too_many_arguments)]
	pub async fn capture_snapshot(
		&self,
		session_id: &str,
		snapshot_asn: Option<i64>,
		snapshot_country: Option<&str>,
		snapshot_ip_type: Option<&str>,
		enrichment: serde_json::Value,
		now: DateTime<Utc>,
	) -> Result<SessionSummary, StoreError> {
		let updated = sqlx::query_as::<_, SessionSummary>(
			r#"
			UPDATE session_summaries SET
				snapshot_asn = $2,
				snapshot_country = $3,
				snapshot_ip_type = $4,
				enrichment = $5,
				enrichment_at = $6
			WHERE session_id = $1 AND enrichment_at IS NULL
			RETURNING *
			"#,
		)
		.bind(session_id)
		.bind(snapshot_asn)
		.bind(snapshot_country)
		.bind(snapshot_ip_type)
		.bind(enrichment)
		.bind(now)
		.fetch_optional(self.pool)
		.await?;

		match updated {
			Some(row) => Ok(row),
			None => self
				.find(session_id)
				.await?
				.ok_or_else(|| StoreError::NotFound(session_id.to_string())),
		}
	}

	/// Joins on `source_ip` and copies the current inventory row's state
	/// onto a session that never got a snapshot. `geo_country`/`ip_type`
	/// are derived the same way the live cascade derives them
	/// ([`IpInventory::geo_country`]/[`IpInventory::ip_type`]) — that logic
	/// reads the JSON `enrichment` column and can't be replicated as a bare
	/// SQL expression, so this fetches the candidate row, derives in Rust,
	/// then writes through the same write-once guard as
	/// [`Self::capture_snapshot`].
	pub async fn backfill_missing_snapshot(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<SessionSummary>, StoreError> {
		let Some(session) = self.find(session_id).await? else {
			return Ok(None);
		};
		if session.has_snapshot() {
			return Ok(Some(session));
		}
		let Some(source_ip) = session.source_ip.as_deref() else {
			return Ok(Some(session));
		};

		let inventory = sqlx::query_as::<_, IpInventory>("SELECT * FROM ip_inventory WHERE ip_address = $1")
			.bind(source_ip)
			.fetch_optional(self.pool)
			.await?;
		let Some(inventory) = inventory else {
			return Ok(Some(session));
		};

		let country = inventory.geo_country();
		let ip_type = inventory.ip_type();
		self.capture_snapshot(session_id, inventory.current_asn, Some(&country), ip_type.as_deref(), inventory.enrichment.clone(), now)
			.await
			.map(Some)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ip_inventory::IpInventoryRepo;
	use crate::test_support::migrated;
	use serde_json::json;

	/// Regression: the backfill must derive `snapshot_country`/`snapshot_ip_type`
	/// from the joined inventory row's JSON `enrichment`, not hardcode them
	/// null.
	#[sqlx::test(migrations = false)]
	async fn backfill_derives_country_and_ip_type_from_enrichment(pool: PgPool) {
		let pool = migrated(pool).await;
		let sessions = SessionRepo::new(&pool);
		let inventory = IpInventoryRepo::new(&pool);
		let now = Utc::now();

		inventory
			.insert_new(
				"198.51.100.7",
				Some(4134),
				Some(now),
				json!({"offline-geo": {"country": "CN"}, "commercial-intel": {"ip_type": "hosting"}}),
				"v1",
				now,
			)
			.await
			.unwrap();
		sessions.ensure_started("sess-1", Some("198.51.100.7"), now).await.unwrap();

		let backfilled = sessions.backfill_missing_snapshot("sess-1", now).await.unwrap().unwrap();
		assert_eq!(backfilled.snapshot_asn, Some(4134));
		assert_eq!(backfilled.snapshot_country.as_deref(), Some("CN"));
		assert_eq!(backfilled.snapshot_ip_type.as_deref(), Some("hosting"));
		assert!(backfilled.has_snapshot());
	}

	#[sqlx::test(migrations = false)]
	async fn backfill_is_a_no_op_once_a_snapshot_already_exists(pool: PgPool) {
		let pool = migrated(pool).await;
		let sessions = SessionRepo::new(&pool);
		let inventory = IpInventoryRepo::new(&pool);
		let now = Utc::now();

		inventory.insert_new("198.51.100.7", Some(4134), Some(now), json!({"offline-geo": {"country": "CN"}}), "v1", now).await.unwrap();
		sessions.ensure_started("sess-1", Some("198.51.100.7"), now).await.unwrap();
		sessions.capture_snapshot("sess-1", Some(1), Some("XX"), None, json!({}), now).await.unwrap();

		let result = sessions.backfill_missing_snapshot("sess-1", now).await.unwrap().unwrap();
		assert_eq!(result.snapshot_asn, Some(1));
		assert_eq!(result.snapshot_country.as_deref(), Some("XX"));
	}
}
