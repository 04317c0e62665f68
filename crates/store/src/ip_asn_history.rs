//! `IPASNHistory`: append-only, one row per observed ASN change.

use crate::StoreError;
use crate::models::IpAsnHistory;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct IpAsnHistoryRepo<'a> {
	pool: &'a PgPool,
}

impl<'a> IpAsnHistoryRepo<'a> {
	pub fn new(pool: &'a PgPool) -> Self {
		Self { pool }
	}

	pub async fn append(&self, ip_address: &str, asn_number: i64, verification_source: &str, observed_at: DateTime<Utc>) -> Result<(), StoreError> {
		sqlx::query(
			r#"
			INSERT INTO ip_asn_history (ip_address, asn_number, observed_at, verification_source)
			VALUES ($1, $2, $3, $4)
			ON CONFLICT (ip_address, asn_number, observed_at) DO NOTHING
			"#,
		)
		.bind(ip_address)
		.bind(asn_number)
		.bind(observed_at)
		.bind(verification_source)
		.execute(self.pool)
		.await?;
		Ok(())
	}

	pub async fn for_ip(&self, ip_address: &str) -> Result<Vec<IpAsnHistory>, StoreError> {
		sqlx::query_as::<_, IpAsnHistory>("SELECT * FROM ip_asn_history WHERE ip_address = $1 ORDER BY observed_at ASC")
			.bind(ip_address)
			.fetch_all(self.pool)
			.await
			.map_err(StoreError::from)
	}
}
