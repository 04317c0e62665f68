//! `DeadLetterEvent`: quarantined payloads any component can write, never
//! mutated, retained for offline review (§4.L).

use crate::StoreError;
use crate::models::DeadLetterEvent;
use sqlx::PgPool;

pub struct DeadLetterRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> DeadLetterRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn quarantine(
		&self,
		raw_payload: &str,
		reason: &str,
		source_path: Option<&str>,
		byte_offset: Option<i64>,
	) -> Result<DeadLetterEvent, StoreError> {
		sqlx::query_as::<_, DeadLetterEvent>(
			r#"
			INSERT INTO dead_letter_events (raw_payload, reason, source_path, byte_offset)
			VALUES ($1, $2, $3, $4)
			RETURNING id, raw_payload, reason, source_path, byte_offset, quarantined_at
			"#,
		)
		.bind(raw_payload)
		.bind(reason)
		.bind(source_path)
		.bind(byte_offset)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	pub async fn recent(&self, limit: i64) -> Result<Vec<DeadLetterEvent>, StoreError> {
		sqlx::query_as::<_, DeadLetterEvent>("SELECT * FROM dead_letter_events ORDER BY quarantined_at DESC LIMIT $1")
			.bind(limit)
			.fetch_all(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
