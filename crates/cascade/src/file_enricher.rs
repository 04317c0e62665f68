//! §4.K: the file enricher. `(session_id, sha256) -> FileIntel` via the
//! file-reputation provider; the cache's own known/unknown TTL split
//! (§4.B, §4.K) is the provider's concern, not this enricher's.

use cowrie_enrich_providers::{FileReputationClient, ProviderError};
use cowrie_enrich_store::Store;
use cowrie_enrich_store::models::FileIntel;
use std::sync::Arc;

pub struct FileEnricher {
	store: Arc<Store>,
	client: Arc<FileReputationClient>,
}

impl FileEnricher {
	pub fn new(store: Arc<Store>, client: Arc<FileReputationClient>) -> Self {
		Self { store, client }
	}

	pub async fn enrich(&self, sha256: &str, now: chrono::DateTime<chrono::Utc>) -> Result<Option<FileIntel>, EnrichError> {
		let Some(result) = self.client.lookup(sha256).await? else {
			return Ok(None);
		};
		let row = self.store.files().record_verdict(sha256, &result.classification, result.positive_ratio, now).await?;
		Ok(Some(row))
	}
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
	#[error(transparent)]
	Provider(#[from] ProviderError),
	#[error(transparent)]
	Store(#[from] cowrie_enrich_store::StoreError),
}
