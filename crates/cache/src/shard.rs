//! Path layout for a `(service, key)` pair: the default digest-sharded
//! layout plus the two specialized layouts providers ask for, along with
//! the legacy paths probed on read before falling back to a miss.

use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStrategy {
	/// `<root>/<service>/<digest[0:2]>/<digest>.json`
	Digest,
	/// `<root>/<service>/<a>/<b>/<c>/<d>.json` for an IPv4 key; falls back
	/// to `Digest` for anything that doesn't parse as IPv4.
	IpOctets,
	/// `<root>/<service>/<key[0:n]>/<digest>.json`; the key is assumed to
	/// already be lowercase hex (a SHA-1 password digest, a hash prefix).
	HashPrefix(usize),
}

pub fn digest_hex(key: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(key.as_bytes());
	hex::encode(hasher.finalize())
}

pub fn primary_path(root: &Path, service: &str, key: &str, strategy: ShardStrategy) -> PathBuf {
	let digest = digest_hex(key);
	let base = root.join(service);
	match strategy {
		ShardStrategy::Digest => digest_path(&base, &digest),
		ShardStrategy::IpOctets => match key.parse::<IpAddr>() {
			Ok(IpAddr::V4(v4)) => {
				let [a, b, c, d] = v4.octets();
				base.join(a.to_string())
					.join(b.to_string())
					.join(c.to_string())
					.join(format!("{d}.json"))
			}
			_ => digest_path(&base, &digest),
		},
		ShardStrategy::HashPrefix(n) => {
			let prefix: String = key.chars().take(n).collect();
			if prefix.is_empty() {
				digest_path(&base, &digest)
			} else {
				base.join(prefix).join(format!("{digest}.json"))
			}
		}
	}
}

fn digest_path(base: &Path, digest: &str) -> PathBuf {
	base.join(&digest[0..2]).join(format!("{digest}.json"))
}

/// Primary path first, then legacy layouts this service may have used
/// before specializing. `load_bytes` probes these in order and migrates
/// on the first hit.
pub fn candidate_paths(root: &Path, service: &str, key: &str, strategy: ShardStrategy) -> Vec<PathBuf> {
	let primary = primary_path(root, service, key, strategy);
	let mut candidates = vec![primary.clone()];
	// A service reconfigured from the plain digest layout into `IpOctets`
	// or `HashPrefix` still needs to find entries written before the
	// specialization; the digest layout is always probed as a fallback.
	let digest = digest_hex(key);
	let base = root.join(service);
	let flat_digest = digest_path(&base, &digest);
	if flat_digest != primary {
		candidates.push(flat_digest);
	}
	candidates
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ip_octets_shard_ipv4() {
		let path = primary_path(Path::new("/cache"), "scanner-reputation", "203.0.113.7", ShardStrategy::IpOctets);
		assert_eq!(path, Path::new("/cache/scanner-reputation/203/0/113/7.json"));
	}

	#[test]
	fn ip_octets_falls_back_for_ipv6() {
		let path = primary_path(Path::new("/cache"), "scanner-reputation", "::1", ShardStrategy::IpOctets);
		assert!(path.starts_with("/cache/scanner-reputation"));
		assert!(path.to_string_lossy().ends_with(".json"));
		assert!(!path.to_string_lossy().contains("::1"));
	}

	#[test]
	fn hash_prefix_shards_on_key_chars() {
		let key = "5baa6"; // SHA-1 prefix of "password"
		let path = primary_path(Path::new("/cache"), "hash-prefix", key, ShardStrategy::HashPrefix(5));
		assert!(path.starts_with("/cache/hash-prefix/5baa6"));
	}

	#[test]
	fn digest_strategy_shards_on_first_two_hex_chars() {
		let path = primary_path(Path::new("/cache"), "whois-asn", "AS13335", ShardStrategy::Digest);
		let digest = digest_hex("AS13335");
		assert_eq!(path, Path::new("/cache/whois-asn").join(&digest[0..2]).join(format!("{digest}.json")));
	}
}
