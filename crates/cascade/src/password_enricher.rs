//! §4.K.3: password prevalence via the hash-prefix k-anonymity provider.
//! The provider caches the whole bucket; this enricher only records the
//! per-password prevalence row.

use chrono::{DateTime, Utc};
use cowrie_enrich_providers::{PasswordHashPrefixClient, ProviderError};
use cowrie_enrich_store::Store;
use cowrie_enrich_store::models::PasswordIntel;
use sha1::{Digest, Sha1};
use std::sync::Arc;

pub struct PasswordEnricher {
	store: Arc<Store>,
	client: Arc<PasswordHashPrefixClient>,
}

impl PasswordEnricher {
	pub fn new(store: Arc<Store>, client: Arc<PasswordHashPrefixClient>) -> Self {
		Self { store, client }
	}

	pub async fn enrich(&self, password: &str, now: DateTime<Utc>) -> Result<PasswordIntel, EnrichError> {
		let prevalence = self.client.prevalence(password).await?;
		let digest = sha1_hex(password.as_bytes());
		let row = self.store.passwords().record_submission(&digest, prevalence as i64, now).await?;
		Ok(row)
	}
}

fn sha1_hex(bytes: &[u8]) -> String {
	let mut hasher = Sha1::new();
	hasher.update(bytes);
	hex::encode_upper(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
	#[error(transparent)]
	Provider(#[from] ProviderError),
	#[error(transparent)]
	Store(#[from] cowrie_enrich_store::StoreError),
}
