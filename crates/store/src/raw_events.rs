//! `RawEvent`: inserted once by the loader, never mutated.

use crate::StoreError;
use crate::models::RawEvent;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub struct RawEventRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> RawEventRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	#[allow(clippy::too_many_arguments)]
	pub async fn insert(
		&self,
		source_path: &str,
		byte_offset: i64,
		inode: i64,
		generation: i32,
		payload: &Value,
		session_id: Option<&str>,
		event_type: Option<&str>,
		event_timestamp: Option<DateTime<Utc>>,
		risk_score: Option<f64>,
		quarantined: bool,
	) -> Result<RawEvent, StoreError> {
		sqlx::query_as::<_, RawEvent>(
			r#"
			INSERT INTO raw_events
				(source_path, byte_offset, inode, generation, payload, session_id, event_type, event_timestamp, risk_score, quarantined)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
			ON CONFLICT (source_path, byte_offset, inode, generation) DO UPDATE SET source_path = EXCLUDED.source_path
			RETURNING id, source_path, byte_offset, inode, generation, payload, session_id, event_type, event_timestamp, ingested_at, risk_score, quarantined
			"#,
		)
		.bind(source_path)
		.bind(byte_offset)
		.bind(inode)
		.bind(generation)
		.bind(payload)
		.bind(session_id)
		.bind(event_type)
		.bind(event_timestamp)
		.bind(risk_score)
		.bind(quarantined)
		.fetch_one(self.pool)
		.await
		.map_err(|e| StoreError::from_sqlx("raw_events", e))
	}

	pub async fn find(&self, id: Uuid) -> Result<Option<RawEvent>, StoreError> {
		sqlx::query_as::<_, RawEvent>("SELECT * FROM raw_events WHERE id = $1")
			.bind(id)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}

	pub async fn for_session(&self, session_id: &str) -> Result<Vec<RawEvent>, StoreError> {
		sqlx::query_as::<_, RawEvent>("SELECT * FROM raw_events WHERE session_id = $1 ORDER BY event_timestamp ASC")
			.bind(session_id)
			.fetch_all(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
