//! §4.J: when a session summary is first materialized, run the cascade
//! for its source IP and write the resulting snapshot columns exactly
//! once.

use crate::CascadeError;
use crate::orchestrator::CascadeOrchestrator;
use cowrie_enrich_core::Clock;
use cowrie_enrich_core::net::parse_ip;
use cowrie_enrich_store::Store;
use cowrie_enrich_store::models::SessionSummary;
use std::sync::Arc;
use tracing::debug;

pub struct SessionSnapshotter {
	store: Arc<Store>,
	cascade: Arc<CascadeOrchestrator>,
	clock: Arc<dyn Clock>,
}

impl SessionSnapshotter {
	pub fn new(store: Arc<Store>, cascade: Arc<CascadeOrchestrator>, clock: Arc<dyn Clock>) -> Self {
		Self { store, cascade, clock }
	}

	/// No-op if the session has no source IP, or already carries a
	/// snapshot — the write-once guard lives in the store layer, but we
	/// skip the cascade call entirely when we already know it would be
	/// wasted.
	pub async fn capture(&self, session_id: &str) -> Result<Option<SessionSummary>, CascadeError> {
		let session = match self.store.sessions().find(session_id).await? {
			Some(s) => s,
			None => return Ok(None),
		};
		if session.has_snapshot() {
			return Ok(Some(session));
		}
		let Some(source_ip) = session.source_ip.as_deref() else {
			return Ok(Some(session));
		};
		let ip = match parse_ip(source_ip) {
			Ok(ip) => ip,
			Err(_) => {
				debug!(session_id, source_ip, "unparseable source IP, skipping snapshot");
				return Ok(Some(session));
			}
		};

		let inventory = self.cascade.enrich_single_ip(ip).await?;
		let now = self.clock.now();
		let snapshot = self
			.store
			.sessions()
			.capture_snapshot(
				session_id,
				inventory.current_asn,
				Some(&inventory.geo_country()),
				inventory.ip_type().as_deref(),
				inventory.enrichment.clone(),
				now,
			)
			.await?;
		Ok(Some(snapshot))
	}

	/// Batch backfill for historical sessions: joins on `source_ip` and
	/// copies whatever inventory state prevails today, skipping rows that
	/// already carry a snapshot.
	pub async fn backfill(&self, session_id: &str) -> Result<Option<SessionSummary>, CascadeError> {
		Ok(self.store.sessions().backfill_missing_snapshot(session_id, self.clock.now()).await?)
	}
}
