//! Postgres persistence for the three-tier ASN → IP → Session model plus
//! the dead-letter sink and the ancillary per-key/per-password/per-file
//! intelligence tables. Every repository borrows a `&PgPool`; callers own
//! pooling, TLS, and migrations.

pub mod asn_inventory;
pub mod dead_letter;
pub mod error;
pub mod files;
pub mod ip_asn_history;
pub mod ip_inventory;
pub mod models;
pub mod passwords;
pub mod raw_events;
pub mod schema_version;
pub mod sessions;
pub mod ssh_keys;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::StoreError;

use cowrie_enrich_core::Clock;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Embeds and runs `migrations/` against `pool`. The migration *runner* is
/// ambient infrastructure the core still owns (§3 notes the runner itself
/// is out of scope for the relational model, not for bootstrapping tests).
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
	sqlx::migrate!("./migrations").run(pool).await
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
	PgPoolOptions::new()
		.max_connections(max_connections)
		.acquire_timeout(Duration::from_secs(10))
		.connect(database_url)
		.await
}

/// A thin facade bundling every repository behind one owned `PgPool`, for
/// callers (the cascade, the bulk jobs) that need more than one table.
pub struct Store {
	pool: PgPool,
	clock: Arc<dyn Clock>,
}

impl Store {
	pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
		Self { pool, clock }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub fn raw_events(&self) -> raw_events::RawEventRepo<'_> {
		raw_events::RawEventRepo::new(&self.pool)
	}

	pub fn sessions(&self) -> sessions::SessionRepo<'_> {
		sessions::SessionRepo::new(&self.pool)
	}

	pub fn ip_inventory(&self) -> ip_inventory::IpInventoryRepo<'_> {
		ip_inventory::IpInventoryRepo::new(&self.pool)
	}

	pub fn asn_inventory(&self) -> asn_inventory::AsnInventoryRepo<'_> {
		asn_inventory::AsnInventoryRepo::new(&self.pool, self.clock.clone())
	}

	pub fn ip_asn_history(&self) -> ip_asn_history::IpAsnHistoryRepo<'_> {
		ip_asn_history::IpAsnHistoryRepo::new(&self.pool)
	}

	pub fn dead_letter(&self) -> dead_letter::DeadLetterRepo<'_> {
		dead_letter::DeadLetterRepo::new(&self.pool)
	}

	pub fn ssh_keys(&self) -> ssh_keys::SshKeyRepo<'_> {
		ssh_keys::SshKeyRepo::new(&self.pool)
	}

	pub fn passwords(&self) -> passwords::PasswordRepo<'_> {
		passwords::PasswordRepo::new(&self.pool)
	}

	pub fn files(&self) -> files::FileIntelRepo<'_> {
		files::FileIntelRepo::new(&self.pool)
	}

	pub fn schema_version(&self) -> schema_version::SchemaVersionRepo<'_> {
		schema_version::SchemaVersionRepo::new(&self.pool)
	}
}
