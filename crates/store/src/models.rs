//! Row types for every table in §3's data model. Plain `sqlx::FromRow`
//! structs; no behavior lives here, that's in the repository modules.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawEvent {
	pub id: Uuid,
	pub source_path: String,
	pub byte_offset: i64,
	pub inode: i64,
	pub generation: i32,
	pub payload: Value,
	pub session_id: Option<String>,
	pub event_type: Option<String>,
	pub event_timestamp: Option<DateTime<Utc>>,
	pub ingested_at: DateTime<Utc>,
	pub risk_score: Option<f64>,
	pub quarantined: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionSummary {
	pub session_id: String,
	pub first_event_at: DateTime<Utc>,
	pub last_event_at: DateTime<Utc>,
	pub event_count: i64,
	pub command_count: i64,
	pub file_download_count: i64,
	pub login_attempt_count: i64,
	pub ssh_key_injection_count: i64,
	pub unique_ssh_key_count: i64,
	pub vt_flagged: bool,
	pub dshield_flagged: bool,
	pub risk_score: f64,
	pub source_files: Value,
	pub enrichment: Option<Value>,
	pub source_ip: Option<String>,
	pub snapshot_asn: Option<i64>,
	pub snapshot_country: Option<String>,
	pub snapshot_ip_type: Option<String>,
	pub ssh_key_fingerprint: Option<String>,
	pub password_hash: Option<String>,
	pub command_signature: Option<String>,
	pub enrichment_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
	/// Snapshot columns are write-once; a row already carrying a snapshot
	/// must never be handed a new one (§4.J).
	pub fn has_snapshot(&self) -> bool {
		self.enrichment_at.is_some()
	}
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IpInventory {
	pub ip_address: String,
	pub current_asn: Option<i64>,
	pub asn_last_verified: Option<DateTime<Utc>>,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub session_count: i64,
	pub enrichment: Value,
	pub enrichment_updated_at: Option<DateTime<Utc>>,
	pub enrichment_version: String,
}

impl IpInventory {
	/// Geo country derived with the priority order in §4.G.2: offline-geo
	/// wins, then whois, then the scanner-reputation feed, then "XX".
	pub fn geo_country(&self) -> String {
		self.enrichment
			.get("offline-geo")
			.and_then(|v| v.get("country"))
			.or_else(|| self.enrichment.get("whois").and_then(|v| v.get("country")))
			.or_else(|| self.enrichment.get("scanner-reputation").and_then(|v| v.get("country")))
			.and_then(|v| v.as_str())
			.unwrap_or("XX")
			.to_string()
	}

	pub fn ip_type(&self) -> Option<String> {
		self.enrichment
			.get("commercial-intel")
			.and_then(|v| v.get("ip_type"))
			.and_then(|v| v.as_str())
			.map(str::to_string)
	}

	pub fn is_scanner(&self) -> bool {
		self.enrichment
			.get("scanner-reputation")
			.and_then(|v| v.get("is_scanner"))
			.and_then(|v| v.as_bool())
			.unwrap_or(false)
	}
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AsnInventory {
	pub asn_number: i64,
	pub organization_name: Option<String>,
	pub organization_country: Option<String>,
	pub rir_registry: Option<String>,
	pub asn_type: Option<String>,
	pub is_known_hosting: bool,
	pub is_known_vpn: bool,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub unique_ip_count: i64,
	pub total_session_count: i64,
	pub enrichment: Value,
	pub enrichment_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IpAsnHistory {
	pub ip_address: String,
	pub asn_number: i64,
	pub observed_at: DateTime<Utc>,
	pub verification_source: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeadLetterEvent {
	pub id: Uuid,
	pub raw_payload: String,
	pub reason: String,
	pub source_path: Option<String>,
	pub byte_offset: Option<i64>,
	pub quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SchemaVersionRow {
	pub version: i32,
	pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SshKeyIntel {
	pub fingerprint: String,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub session_count: i64,
	pub source_ip_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionSshKey {
	pub session_id: String,
	pub fingerprint: String,
	pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordIntel {
	pub password_sha1: String,
	pub prevalence_count: i64,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub session_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileIntel {
	pub sha256: String,
	pub classification: String,
	pub positive_ratio: f64,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub session_count: i64,
}
