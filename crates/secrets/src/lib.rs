//! Resolves an opaque `scheme:rest` URI into a redacted secret string.
//! Supported out of the box: `env:NAME` (process environment) and
//! `file:/path` (file contents, trimmed). Additional schemes (a vault
//! client, an encrypted blob) can be registered without touching callers.
//!
//! A bare string with no `scheme:` prefix is rejected outright: a
//! configuration file that embeds a plaintext API key is a programming
//! error, not a degraded-but-working configuration.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// A resolved secret. `Debug`/`Display` are redacted so it can be embedded
/// in a larger config struct or provider client without risking a leak
/// through a log line or panic message.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
	pub fn expose(&self) -> &str {
		self.0.expose_secret()
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Secret(<redacted>)")
	}
}

impl fmt::Display for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<redacted>")
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
	#[error("secret value has no scheme prefix (plaintext secrets are rejected): {0:?}")]
	Plaintext(String),
	#[error("unknown secret scheme {0:?}")]
	UnknownScheme(String),
	#[error("environment variable {0:?} is not set")]
	EnvNotSet(String),
	#[error("failed to read secret file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("secret resolved to an empty value")]
	Empty,
}

/// A pluggable secret source keyed by URI scheme (`env`, `file`, or a
/// caller-supplied vault integration).
pub trait SchemeResolver: Send + Sync {
	fn resolve(&self, rest: &str) -> Result<String, SecretError>;
}

struct EnvScheme;

impl SchemeResolver for EnvScheme {
	fn resolve(&self, rest: &str) -> Result<String, SecretError> {
		std::env::var(rest).map_err(|_| SecretError::EnvNotSet(rest.to_string()))
	}
}

struct FileScheme;

impl SchemeResolver for FileScheme {
	fn resolve(&self, rest: &str) -> Result<String, SecretError> {
		fs::read_to_string(rest)
			.map(|s| s.trim().to_string())
			.map_err(|source| SecretError::FileRead {
				path: PathBuf::from(rest),
				source,
			})
	}
}

pub struct SecretResolver {
	schemes: HashMap<String, Box<dyn SchemeResolver>>,
}

impl Default for SecretResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl SecretResolver {
	pub fn new() -> Self {
		let mut schemes: HashMap<String, Box<dyn SchemeResolver>> = HashMap::new();
		schemes.insert("env".to_string(), Box::new(EnvScheme));
		schemes.insert("file".to_string(), Box::new(FileScheme));
		Self { schemes }
	}

	/// Register (or replace) a scheme handler, e.g. a vault-backed resolver
	/// under `"vault"`.
	pub fn register(&mut self, scheme: impl Into<String>, resolver: Box<dyn SchemeResolver>) {
		self.schemes.insert(scheme.into(), resolver);
	}

	/// Resolve a `scheme:rest` URI. Failures are logged at warning level;
	/// the caller is expected to fall back to a no-op client rather than
	/// fail startup outright.
	pub fn resolve(&self, uri: &str) -> Result<Secret, SecretError> {
		match self.try_resolve(uri) {
			Ok(secret) => Ok(secret),
			Err(e) => {
				warn!(uri, error = %e, "failed to resolve secret");
				Err(e)
			}
		}
	}

	fn try_resolve(&self, uri: &str) -> Result<Secret, SecretError> {
		let (scheme, rest) = uri
			.split_once(':')
			.ok_or_else(|| SecretError::Plaintext(uri.to_string()))?;
		let resolver = self
			.schemes
			.get(scheme)
			.ok_or_else(|| SecretError::UnknownScheme(scheme.to_string()))?;
		let value = resolver.resolve(rest)?;
		if value.is_empty() {
			return Err(SecretError::Empty);
		}
		Ok(Secret(SecretString::new(value.into_boxed_str())))
	}
}
