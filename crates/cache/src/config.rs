//! Per-service TTL and shard-strategy table. `CacheConfig::with_defaults`
//! seeds the table the providers crate expects; callers may still override
//! any entry (most notably the hash-prefix breach-data TTL, which the
//! component design leaves caller-configurable).

use crate::ShardStrategy;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ServiceTtl {
	pub ttl: Option<Duration>,
	pub strategy: ShardStrategy,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
	services: HashMap<String, ServiceTtl>,
}

impl CacheConfig {
	pub fn empty() -> Self {
		Self { services: HashMap::new() }
	}

	/// The TTL table from the component design: offline-geo (7d), ASN
	/// whois (90d), scanner reputation (7d), IP-reputation threat feed
	/// (7d), commercial-intel (14d), file reputation (30d known / 12h
	/// unknown), and a hash-prefix pair (24h default / 12h unknown),
	/// overridable by the caller.
	pub fn with_defaults() -> Self {
		let day = Duration::from_secs(24 * 3600);
		let mut config = Self::empty();
		config.register("offline-geo", Some(day * 7), ShardStrategy::Digest);
		config.register("whois-asn", Some(day * 90), ShardStrategy::Digest);
		config.register("scanner-reputation", Some(day * 7), ShardStrategy::IpOctets);
		config.register("ip-reputation", Some(day * 7), ShardStrategy::IpOctets);
		config.register("commercial-intel", Some(day * 14), ShardStrategy::IpOctets);
		config.register("file-reputation", Some(day * 30), ShardStrategy::Digest);
		config.register("file-reputation-unknown", Some(day / 2), ShardStrategy::Digest);
		config.register("hash-prefix", Some(day), ShardStrategy::HashPrefix(5));
		config.register("hash-prefix-unknown", Some(day / 2), ShardStrategy::HashPrefix(5));
		config
	}

	pub fn register(&mut self, service: impl Into<String>, ttl: Option<Duration>, strategy: ShardStrategy) {
		self.services.insert(service.into(), ServiceTtl { ttl, strategy });
	}

	/// `None` means no TTL is configured for this service: entries never
	/// expire and `cleanup_expired` skips it.
	pub fn ttl_for(&self, service: &str) -> Option<Duration> {
		self.services.get(service).and_then(|s| s.ttl)
	}

	pub fn strategy_for(&self, service: &str) -> ShardStrategy {
		self.services
			.get(service)
			.map(|s| s.strategy)
			.unwrap_or(ShardStrategy::Digest)
	}

	pub fn service_names(&self) -> Vec<String> {
		self.services.keys().cloned().collect()
	}
}
