//! Shared fixture for store tests. `#[sqlx::test(migrations = false)]`
//! hands every test an isolated, empty Postgres database; [`migrated`]
//! runs the real [`run_migrations`] against it so the migration runner
//! itself — otherwise never exercised — is part of the test suite.
use crate::run_migrations;
use sqlx::PgPool;

pub async fn migrated(pool: PgPool) -> PgPool {
	run_migrations(&pool).await.expect("run migrations against test database");
	pool
}
