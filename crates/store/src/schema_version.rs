//! The core only ever reads this table; the migration runner that writes
//! it is out of scope here.

use crate::StoreError;
use crate::models::SchemaVersionRow;
use sqlx::PgPool;

pub const EXPECTED_SCHEMA_VERSION: i32 = 1;

pub struct SchemaVersionRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> SchemaVersionRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn current(&self) -> Result<SchemaVersionRow, StoreError> {
		sqlx::query_as::<_, SchemaVersionRow>("SELECT version, applied_at FROM schema_version ORDER BY version DESC LIMIT 1")
			.fetch_optional(self.pool)
			.await?
			.ok_or_else(|| StoreError::NotFound("schema_version".to_string()))
	}

	/// Refuse to run against a schema the code wasn't written for. Called
	/// once at startup.
	pub async fn assert_expected(&self) -> Result<(), StoreError> {
		let row = self.current().await?;
		if row.version != EXPECTED_SCHEMA_VERSION {
			return Err(StoreError::SchemaMismatch {
				expected: EXPECTED_SCHEMA_VERSION,
				found: row.version,
			});
		}
		Ok(())
	}
}
