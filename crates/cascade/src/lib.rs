//! §4.G–§4.K: the enrichment cascade. Everything here sits on top of
//! `cowrie-enrich-store` and `cowrie-enrich-providers` and knows nothing
//! about how events arrive; it only turns IPs, sessions, keys, passwords,
//! and files into enriched rows.

pub mod bulk;
pub mod error;
pub mod file_enricher;
pub mod freshness;
pub mod orchestrator;
pub mod password_enricher;
pub mod session_snapshot;
pub mod ssh_keys;
pub mod stats;

pub use error::CascadeError;
pub use orchestrator::CascadeOrchestrator;
