//! IP classification helpers shared by validation (dead-letter routing) and
//! the `is_bogon` derived field on `IPInventory`.

use ipnet::IpNet;
use once_cell::sync::Lazy;
use std::net::IpAddr;
use std::str::FromStr;

static BOGON_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
	[
		// IPv4 reserved/unallocated/non-routable ranges.
		"0.0.0.0/8",
		"10.0.0.0/8",
		"100.64.0.0/10",
		"127.0.0.0/8",
		"169.254.0.0/16",
		"172.16.0.0/12",
		"192.0.0.0/24",
		"192.0.2.0/24",
		"192.168.0.0/16",
		"198.18.0.0/15",
		"198.51.100.0/24",
		"203.0.113.0/24",
		"224.0.0.0/4",
		"240.0.0.0/4",
		"255.255.255.255/32",
		// IPv6 reserved/non-routable ranges.
		"::/128",
		"::1/128",
		"::ffff:0:0/96",
		"64:ff9b::/96",
		"100::/64",
		"2001:db8::/32",
		"fc00::/7",
		"fe80::/10",
		"ff00::/8",
	]
	.iter()
	.map(|s| IpNet::from_str(s).expect("static bogon range"))
	.collect()
});

/// Whether `ip` falls in a reserved, unallocated, or otherwise non-routable
/// range. Used to populate `IPInventory.is_bogon`; never blocks enrichment,
/// it is informational only.
pub fn is_bogon(ip: IpAddr) -> bool {
	BOGON_NETS.iter().any(|net| net.contains(&ip))
}

/// Parse a raw string as an IP address. Separated from `IpAddr::from_str`
/// only so call sites read as domain intent ("validate what the loader
/// handed us") rather than a bare stdlib parse.
pub fn parse_ip(raw: &str) -> Result<IpAddr, InvalidIp> {
	IpAddr::from_str(raw.trim()).map_err(|_| InvalidIp(raw.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("invalid IP address: {0:?}")]
pub struct InvalidIp(pub String);
