//! Errors the cascade surfaces to its caller. Provider/store failures are
//! wrapped rather than propagated raw so callers have one type to match
//! on; a cancelled cascade is its own variant rather than a partial
//! `IPInventory` (§5).

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
	#[error(transparent)]
	Store(#[from] cowrie_enrich_store::StoreError),
	#[error("cascade for {ip} was cancelled before completion")]
	Cancelled { ip: String },
}
