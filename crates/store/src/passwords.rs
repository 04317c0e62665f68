//! `PasswordIntel` (§4.K.3): keyed by the full password SHA-1, distinct
//! from the hash-prefix bucket cached by the blob cache.

use crate::StoreError;
use crate::models::PasswordIntel;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct PasswordRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> PasswordRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn record_submission(&self, password_sha1: &str, prevalence_count: i64, now: DateTime<Utc>) -> Result<PasswordIntel, StoreError> {
		sqlx::query_as::<_, PasswordIntel>(
			r#"
			INSERT INTO password_intel (password_sha1, prevalence_count, first_seen, last_seen, session_count)
			VALUES ($1, $2, $3, $3, 1)
			ON CONFLICT (password_sha1) DO UPDATE SET
				prevalence_count = $2,
				last_seen = $3,
				session_count = password_intel.session_count + 1
			RETURNING *
			"#,
		)
		.bind(password_sha1)
		.bind(prevalence_count)
		.bind(now)
		.fetch_one(self.pool)
		.await
		.map_err(StoreError::from)
	}

	pub async fn find(&self, password_sha1: &str) -> Result<Option<PasswordIntel>, StoreError> {
		sqlx::query_as::<_, PasswordIntel>("SELECT * FROM password_intel WHERE password_sha1 = $1")
			.bind(password_sha1)
			.fetch_optional(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
