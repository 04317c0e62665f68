//! `SshKeyIntel` + `SessionSshKey` (§4.K.2): upserting the counters and
//! inserting the link happens in one logical operation, idempotent on
//! `(session_id, fingerprint)`.

use crate::StoreError;
use crate::models::SshKeyIntel;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct SshKeyRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> SshKeyRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	/// Records that `fingerprint` was submitted in `session_id`. Idempotent
	/// on `(session_id, fingerprint)`: counters are recomputed from the
	/// link table rather than incremented, so re-delivery never
	/// double-counts.
	pub async fn record_submission(&self, fingerprint: &str, session_id: &str, now: DateTime<Utc>) -> Result<SshKeyIntel, StoreError> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			INSERT INTO session_ssh_keys (session_id, fingerprint, observed_at)
			VALUES ($1, $2, $3)
			ON CONFLICT (session_id, fingerprint) DO NOTHING
			"#,
		)
		.bind(session_id)
		.bind(fingerprint)
		.bind(now)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			r#"
			INSERT INTO ssh_key_intel (fingerprint, first_seen, last_seen, session_count, source_ip_count)
			VALUES ($1, $2, $2, 1, 0)
			ON CONFLICT (fingerprint) DO UPDATE SET last_seen = $2
			"#,
		)
		.bind(fingerprint)
		.bind(now)
		.execute(&mut *tx)
		.await?;

		let row = sqlx::query_as::<_, SshKeyIntel>(
			r#"
			UPDATE ssh_key_intel SET
				session_count = (SELECT count(DISTINCT session_id) FROM session_ssh_keys WHERE fingerprint = $1),
				source_ip_count = (
					SELECT count(DISTINCT s.source_ip)
					FROM session_ssh_keys k
					JOIN session_summaries s ON s.session_id = k.session_id
					WHERE k.fingerprint = $1 AND s.source_ip IS NOT NULL
				)
			WHERE fingerprint = $1
			RETURNING *
			"#,
		)
		.bind(fingerprint)
		.fetch_one(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(row)
	}

	pub async fn find(&self, fingerprint: &str) -> Result<Option<SshKeyIntel>, StoreError> {
		sqlx::query_as::<_, SshKeyIntel>("SELECT * FROM ssh_key_intel WHERE fingerprint = $1")
			.bind(fingerprint)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
