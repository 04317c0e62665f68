//! `FileIntel`: the file enricher's per-hash record (§4.K, classification
//! + positive ratio + first-seen).

use crate::StoreError;
use crate::models::FileIntel;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct FileIntelRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> FileIntelRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn record_verdict(&self, sha256: &str, classification: &str, positive_ratio: f64, now: DateTime<Utc>) -> Result<FileIntel, StoreError> {
		sqlx::query_as::<_, FileIntel>(
			r#"
			INSERT INTO file_intel (sha256, classification, positive_ratio, first_seen, last_seen, session_count)
			VALUES ($1, $2, $3, $4, $4, 1)
			ON CONFLICT (sha256) DO UPDATE SET
				classification = $2,
				positive_ratio = $3,
				last_seen = $4,
				session_count = file_intel.session_count + 1
			RETURNING *
			"#,
		)
		.bind(sha256)
		.bind(classification)
		.bind(positive_ratio)
		.bind(now)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	pub async fn find(&self, sha256: &str) -> Result<Option<FileIntel>, StoreError> {
		sqlx::query_as::<_, FileIntel>("SELECT * FROM file_intel WHERE sha256 = $1")
			.bind(sha256)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
