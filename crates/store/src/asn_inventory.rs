//! `ASNInventory`: the exclusive write path is `ensure_asn` (§4.H.1), row-lock
//! serialized and idempotent; organizational metadata fills in blanks but
//! never overwrites a known value with a null.

use crate::StoreError;
use crate::models::AsnInventory;
use cowrie_enrich_core::Clock;
use sqlx::PgPool;
use std::sync::Arc;

pub struct AsnInventoryRepo<'a> {
	pool: &'a PgPool,
	clock: Arc<dyn Clock>,
}

impl<'a> AsnInventoryRepo<'a> {
	pub fn new(pool: &'a PgPool, clock: Arc<dyn Clock>) -> Self {
		Self { pool, clock }
	}

	/// `ensure_asn(asn, org_name?, org_country?, rir?) -> ASNInventory`.
	/// Opens its own transaction, `SELECT ... FOR UPDATE`s the row, and
	/// either fills blanks on an existing row or inserts a zeroed one.
	pub async fn ensure_asn(
		&self,
		asn_number: i64,
		org_name: Option<&str>,
		org_country: Option<&str>,
		rir: Option<&str>,
	) -> Result<AsnInventory, StoreError> {
		let mut tx = self.pool.begin().await?;
		let now = self.clock.now();

		let existing = sqlx::query_as::<_, AsnInventory>("SELECT * FROM asn_inventory WHERE asn_number = $1 FOR UPDATE")
			.bind(asn_number)
			.fetch_optional(&mut *tx)
			.await?;

		let row = match existing {
			Some(_) => {
				sqlx::query_as::<_, AsnInventory>(
					r#"
					UPDATE asn_inventory SET
						last_seen = $2,
						updated_at = $2,
						organization_name = COALESCE(organization_name, $3),
						organization_country = COALESCE(organization_country, $4),
						rir_registry = COALESCE(rir_registry, $5)
					WHERE asn_number = $1
					RETURNING *
					"#,
				)
				.bind(asn_number)
				.bind(now)
				.bind(org_name)
				.bind(org_country)
				.bind(rir)
				.fetch_one(&mut *tx)
				.await?
			}
			None => {
				sqlx::query_as::<_, AsnInventory>(
					r#"
					INSERT INTO asn_inventory
						(asn_number, organization_name, organization_country, rir_registry, first_seen, last_seen, updated_at)
					VALUES ($1, $2, $3, $4, $5, $5, $5)
					RETURNING *
					"#,
				)
				.bind(asn_number)
				.bind(org_name)
				.bind(org_country)
				.bind(rir)
				.bind(now)
				.fetch_one(&mut *tx)
				.await?
			}
		};

		tx.commit().await?;
		Ok(row)
	}

	/// Bumps the unique-IP and session counters; counters are monotonic,
	/// callers never decrement them directly.
	pub async fn bump_counters(&self, asn_number: i64, new_ip: bool, new_sessions: i64) -> Result<(), StoreError> {
		sqlx::query(
			r#"
			UPDATE asn_inventory SET
				unique_ip_count = unique_ip_count + $2,
				total_session_count = total_session_count + $3
			WHERE asn_number = $1
			"#,
		)
		.bind(asn_number)
		.bind(if new_ip { 1_i64 } else { 0_i64 })
		.bind(new_sessions)
		.execute(self.pool)
		.await?;
		Ok(())
	}

	pub async fn find(&self, asn_number: i64) -> Result<Option<AsnInventory>, StoreError> {
		sqlx::query_as::<_, AsnInventory>("SELECT * FROM asn_inventory WHERE asn_number = $1")
			.bind(asn_number)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}

	/// Replace the ASN's `enrichment` sub-object (used by the staleness
	/// engine's whois refresh path).
	pub async fn update_enrichment(&self, asn_number: i64, enrichment: serde_json::Value) -> Result<(), StoreError> {
		let now = self.clock.now();
		sqlx::query("UPDATE asn_inventory SET enrichment = $2, enrichment_updated_at = $3 WHERE asn_number = $1")
			.bind(asn_number)
			.bind(enrichment)
			.bind(now)
			.execute(self.pool)
			.await?;
		Ok(())
	}
}
