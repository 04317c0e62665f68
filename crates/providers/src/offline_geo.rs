//! Wraps a MaxMind-style `.mmdb` pair (city + ASN) for offline
//! geolocation and ASN attribution. Readers are opened lazily and rotated
//! atomically behind an `ArcSwapOption` (§4.D; the same `Atomic`/
//! `AtomicOption` aliases the teacher's core crate keeps for hot-swappable
//! state).

use crate::ProviderError;
use cowrie_enrich_core::arc::AtomicOption;
use std::io::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, serde::Serialize)]
pub struct OfflineResult {
	pub country_code: Option<String>,
	pub country_name: Option<String>,
	pub city: Option<String>,
	pub latitude: Option<f64>,
	pub longitude: Option<f64>,
	pub accuracy_radius_km: Option<u16>,
	pub asn: Option<u32>,
	pub asn_org: Option<String>,
}

struct Readers {
	city: maxminddb::Reader<Vec<u8>>,
	asn: maxminddb::Reader<Vec<u8>>,
	loaded_at: std::time::SystemTime,
}

/// Either the real on-disk `.mmdb` pair, or (test-only) a canned table of
/// literal responses — the same substitution the scanner-reputation client
/// makes between [`Live`](crate::ScannerReputationClient::Live) and
/// [`NoOp`](crate::ScannerReputationClient::NoOp), but keyed on IP rather
/// than on credential presence.
enum Backend {
	Disk { dir: PathBuf, readers: AtomicOption<Readers> },
	#[cfg(feature = "test-support")]
	Fixed {
		results: std::collections::HashMap<IpAddr, OfflineResult>,
		age: Duration,
	},
}

pub struct OfflineGeoClient {
	backend: Backend,
}

const CITY_FILE: &str = "GeoLite2-City.mmdb";
const ASN_FILE: &str = "GeoLite2-ASN.mmdb";

impl OfflineGeoClient {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self {
			backend: Backend::Disk {
				dir: dir.into(),
				readers: AtomicOption::default(),
			},
		}
	}

	/// Test-only constructor: answers `lookup` from `results` with no disk
	/// I/O, and reports `age` as the database age for freshness checks.
	#[cfg(feature = "test-support")]
	pub fn with_fixed(results: std::collections::HashMap<IpAddr, OfflineResult>, age: Duration) -> Self {
		Self {
			backend: Backend::Fixed { results, age },
		}
	}

	fn ensure_loaded(dir: &Path, readers: &AtomicOption<Readers>) -> Result<(), ProviderError> {
		if readers.load().is_some() {
			return Ok(());
		}
		let loaded = Self::open(dir)?;
		readers.store(Some(std::sync::Arc::new(loaded)));
		Ok(())
	}

	fn open(dir: &Path) -> Result<Readers, ProviderError> {
		let city = maxminddb::Reader::open_readfile(dir.join(CITY_FILE)).map_err(|e| ProviderError::Transient {
			provider: "offline-geo",
			detail: format!("opening {CITY_FILE}: {e}"),
		})?;
		let asn = maxminddb::Reader::open_readfile(dir.join(ASN_FILE)).map_err(|e| ProviderError::Transient {
			provider: "offline-geo",
			detail: format!("opening {ASN_FILE}: {e}"),
		})?;
		let loaded_at = std::fs::metadata(dir.join(CITY_FILE))
			.and_then(|m| m.modified())
			.unwrap_or(std::time::SystemTime::now());
		Ok(Readers { city, asn, loaded_at })
	}

	/// Returns `Ok(None)` when the IP isn't covered by either database —
	/// that is a successful "absent" answer, not an error.
	pub fn lookup(&self, ip: IpAddr) -> Result<Option<OfflineResult>, ProviderError> {
		match &self.backend {
			Backend::Disk { dir, readers } => {
				Self::ensure_loaded(dir, readers)?;
				let guard = readers.load();
				let readers = guard.as_ref().expect("ensure_loaded populated the reader");

				let city_rec: Option<maxminddb::geoip2::City> = readers.city.lookup(ip).ok().flatten();
				let asn_rec: Option<maxminddb::geoip2::Asn> = readers.asn.lookup(ip).ok().flatten();

				if city_rec.is_none() && asn_rec.is_none() {
					return Ok(None);
				}

				let (country_code, country_name, city, latitude, longitude, accuracy_radius_km) = match &city_rec {
					Some(rec) => {
						let country_code = rec.country.as_ref().and_then(|c| c.iso_code).map(str::to_string);
						let country_name = rec
							.country
							.as_ref()
							.and_then(|c| c.names.as_ref())
							.and_then(|n| n.get("en"))
							.map(|s| s.to_string());
						let city = rec
							.city
							.as_ref()
							.and_then(|c| c.names.as_ref())
							.and_then(|n| n.get("en"))
							.map(|s| s.to_string());
						let latitude = rec.location.as_ref().and_then(|l| l.latitude);
						let longitude = rec.location.as_ref().and_then(|l| l.longitude);
						let accuracy_radius_km = rec.location.as_ref().and_then(|l| l.accuracy_radius);
						(country_code, country_name, city, latitude, longitude, accuracy_radius_km)
					}
					None => (None, None, None, None, None, None),
				};

				let (asn, asn_org) = match &asn_rec {
					Some(rec) => (rec.autonomous_system_number, rec.autonomous_system_organization.map(str::to_string)),
					None => (None, None),
				};

				Ok(Some(OfflineResult {
					country_code,
					country_name,
					city,
					latitude,
					longitude,
					accuracy_radius_km,
					asn,
					asn_org,
				}))
			}
			#[cfg(feature = "test-support")]
			Backend::Fixed { results, .. } => Ok(results.get(&ip).cloned()),
		}
	}

	/// Age of the currently loaded database, measured from the city file's
	/// mtime. Triggers a fresh open if no reader is loaded yet.
	pub fn database_age(&self) -> Result<Duration, ProviderError> {
		match &self.backend {
			Backend::Disk { dir, readers } => {
				Self::ensure_loaded(dir, readers)?;
				let guard = readers.load();
				let readers = guard.as_ref().expect("ensure_loaded populated the reader");
				Ok(readers.loaded_at.elapsed().unwrap_or_default())
			}
			#[cfg(feature = "test-support")]
			Backend::Fixed { age, .. } => Ok(*age),
		}
	}

	pub fn should_update(&self) -> bool {
		self.database_age().map(|age| age > Duration::from_secs(7 * 24 * 3600)).unwrap_or(true)
	}

	/// Downloads `city_url`/`asn_url` gzipped tarballs (signed with
	/// `license_secret` as a query parameter, MaxMind-style), extracts the
	/// `.mmdb` member of each atomically (write to a temp file, rename into
	/// place), and rotates the readers. Runs outside the request path —
	/// callers schedule it, nothing here calls it implicitly. Not supported
	/// against the test-only fixed backend.
	pub async fn update(&self, client: &reqwest::Client, city_url: &str, asn_url: &str, license_secret: Option<&cowrie_enrich_secrets::Secret>) -> Result<(), ProviderError> {
		let Backend::Disk { dir, readers } = &self.backend else {
			return Err(ProviderError::Transient {
				provider: "offline-geo",
				detail: "update is not supported on the fixed test backend".to_string(),
			});
		};
		self.download_and_install(dir, client, city_url, CITY_FILE, license_secret).await?;
		self.download_and_install(dir, client, asn_url, ASN_FILE, license_secret).await?;
		let fresh = Self::open(dir)?;
		readers.store(Some(std::sync::Arc::new(fresh)));
		info!("offline geo/ASN database rotated");
		Ok(())
	}

	async fn download_and_install(&self, dir: &Path, client: &reqwest::Client, url: &str, target_name: &str, license_secret: Option<&cowrie_enrich_secrets::Secret>) -> Result<(), ProviderError> {
		let mut request = client.get(url);
		if let Some(secret) = license_secret {
			request = request.query(&[("license_key", secret.expose())]);
		}
		let response = request.send().await.map_err(|e| ProviderError::Transient {
			provider: "offline-geo",
			detail: format!("downloading {target_name}: {e}"),
		})?;
		let bytes = response.bytes().await.map_err(|e| ProviderError::Transient {
			provider: "offline-geo",
			detail: format!("reading {target_name} body: {e}"),
		})?;

		let decoder = flate2::read::GzDecoder::new(bytes.as_ref());
		let mut archive = tar::Archive::new(decoder);
		let entries = archive.entries().map_err(|e| ProviderError::Malformed {
			provider: "offline-geo",
			detail: format!("reading tar entries for {target_name}: {e}"),
		})?;

		for entry in entries {
			let mut entry = entry.map_err(|e| ProviderError::Malformed {
				provider: "offline-geo",
				detail: e.to_string(),
			})?;
			let path = entry.path().map_err(|e| ProviderError::Malformed {
				provider: "offline-geo",
				detail: e.to_string(),
			})?;
			if path.extension().is_some_and(|ext| ext == "mmdb") {
				let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProviderError::Transient {
					provider: "offline-geo",
					detail: e.to_string(),
				})?;
				std::io::copy(&mut entry, &mut tmp).map_err(|e| ProviderError::Transient {
					provider: "offline-geo",
					detail: e.to_string(),
				})?;
				tmp.flush().ok();
				tmp.persist(dir.join(target_name)).map_err(|e| ProviderError::Transient {
					provider: "offline-geo",
					detail: e.error.to_string(),
				})?;
				return Ok(());
			}
		}
		warn!(target_name, "archive contained no .mmdb member");
		Err(ProviderError::Malformed {
			provider: "offline-geo",
			detail: format!("no .mmdb member found for {target_name}"),
		})
	}
}

#[cfg(all(test, feature = "test-support"))]
mod tests {
	use super::*;

	#[test]
	fn fixed_backend_answers_seeded_ip_and_absent_for_others() {
		let mut results = std::collections::HashMap::new();
		let seeded: IpAddr = "8.8.8.8".parse().unwrap();
		results.insert(
			seeded,
			OfflineResult {
				country_code: Some("US".to_string()),
				country_name: Some("United States".to_string()),
				city: Some("Mountain View".to_string()),
				latitude: None,
				longitude: None,
				accuracy_radius_km: None,
				asn: Some(15169),
				asn_org: Some("GOOGLE".to_string()),
			},
		);
		let client = OfflineGeoClient::with_fixed(results, Duration::from_secs(60));

		let hit = client.lookup(seeded).unwrap().unwrap();
		assert_eq!(hit.asn, Some(15169));

		let miss = client.lookup("1.1.1.1".parse().unwrap()).unwrap();
		assert!(miss.is_none());
		assert_eq!(client.database_age().unwrap(), Duration::from_secs(60));
	}
}
