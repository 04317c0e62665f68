//! §4.K.1–4.K.2: SSH public-key extraction from honeypot command text and
//! the per-key intelligence enricher. Runs alongside the cascade but
//! never participates in it.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use chrono::{DateTime, Utc};
use cowrie_enrich_store::Store;
use cowrie_enrich_store::models::SshKeyIntel;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const KEY_TYPES: &[&str] = &["ssh-rsa", "ssh-ed25519", "ssh-dss", "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp384", "ecdsa-sha2-nistp521"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedKey {
	pub key_type: String,
	/// Lowercase-hex SHA-256 of the decoded key blob.
	pub fingerprint: String,
	/// The `SHA256:`-prefixed, unpadded-base64 OpenSSH display form.
	pub display_fingerprint: String,
	pub comment: Option<String>,
}

/// Scans whitespace-separated tokens in `command` for the OpenSSH
/// public-key line grammar (key-type, base64 blob, optional comment). A
/// command with no recognizable key simply yields an empty vec — this is
/// not an error and not dead-letter material (§4.K.1).
pub fn extract_keys(command: &str) -> Vec<ExtractedKey> {
	let tokens: Vec<&str> = command.split_whitespace().collect();
	let mut found = Vec::new();

	let mut i = 0;
	while i < tokens.len() {
		if let Some(key_type) = KEY_TYPES.iter().find(|&&t| tokens[i] == t) {
			if let Some(blob_token) = tokens.get(i + 1) {
				let cleaned = blob_token.trim_end_matches(['\'', '"']);
				if let Ok(decoded) = STANDARD.decode(cleaned) {
					let mut hasher = Sha256::new();
					hasher.update(&decoded);
					let digest = hasher.finalize();
					let fingerprint = hex::encode(digest);
					let display_fingerprint = format!("SHA256:{}", STANDARD_NO_PAD.encode(digest));
					let comment = tokens.get(i + 2).map(|s| s.trim_end_matches(['\'', '"']).to_string()).filter(|c| !c.is_empty());
					found.push(ExtractedKey {
						key_type: key_type.to_string(),
						fingerprint,
						display_fingerprint,
						comment,
					});
					i += 2;
					continue;
				}
			}
		}
		i += 1;
	}
	found
}

pub struct SshKeyEnricher {
	store: Arc<Store>,
}

impl SshKeyEnricher {
	pub fn new(store: Arc<Store>) -> Self {
		Self { store }
	}

	/// Extracts keys from `command`, and for each, upserts `SshKeyIntel`
	/// and appends the session↔key link in one logical, idempotent
	/// operation. Returns the intel rows touched (empty if no keys found).
	pub async fn enrich(&self, session_id: &str, command: &str, now: DateTime<Utc>) -> Result<Vec<SshKeyIntel>, cowrie_enrich_store::StoreError> {
		let keys = extract_keys(command);
		let mut rows = Vec::with_capacity(keys.len());
		for key in &keys {
			let row = self.store.ssh_keys().record_submission(&key.fingerprint, session_id, now).await?;
			rows.push(row);
		}
		Ok(rows)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_ed25519_key_with_comment() {
		let blob = STANDARD.encode(b"fake-key-blob-bytes");
		let command = format!("echo 'ssh-ed25519 {blob} attacker@kali' >> ~/.ssh/authorized_keys");
		let keys = extract_keys(&command);
		assert_eq!(keys.len(), 1);
		assert_eq!(keys[0].key_type, "ssh-ed25519");
		assert_eq!(keys[0].comment.as_deref(), Some("attacker@kali"));
		assert!(keys[0].display_fingerprint.starts_with("SHA256:"));
		assert!(!keys[0].display_fingerprint.contains('='));
	}

	#[test]
	fn command_with_no_key_yields_empty() {
		let keys = extract_keys("ls -la /tmp");
		assert!(keys.is_empty());
	}

	#[test]
	fn malformed_base64_after_key_type_is_skipped() {
		let keys = extract_keys("ssh-rsa not-valid-base64!!! comment");
		assert!(keys.is_empty());
	}

	#[test]
	fn fingerprint_is_deterministic() {
		let blob = STANDARD.encode(b"same-key-bytes");
		let command_a = format!("ssh-rsa {blob} a@b");
		let command_b = format!("printf '%s' 'ssh-rsa {blob}'");
		let a = extract_keys(&command_a);
		let b = extract_keys(&command_b);
		assert_eq!(a[0].fingerprint, b[0].fingerprint);
	}
}
