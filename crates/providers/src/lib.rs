//! External data-source clients: the offline geo/ASN database, the Team
//! Cymru whois service, and the three HTTP-backed reputation/prevalence
//! APIs. Each client owns its own rate limiter and blob-cache namespace;
//! none of them know about the cascade that calls them.

pub mod error;
pub mod file_reputation;
pub mod offline_geo;
pub mod password_hash_prefix;
pub mod scanner_reputation;
mod stats;
pub mod whois;

pub use error::ProviderError;
pub use file_reputation::{FileReputationClient, FileReputationResult};
pub use offline_geo::{OfflineGeoClient, OfflineResult};
pub use password_hash_prefix::PasswordHashPrefixClient;
pub use scanner_reputation::{ReputationResult, ScannerReputationClient};
pub use whois::{AsnWhoisClient, WhoisResult};
