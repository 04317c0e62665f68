//! `tracing-subscriber` initialization. The CLI that owns `main()` is out
//! of scope for this crate, but it still needs a single place to turn a
//! `log_format`/`log_level` config pair into an installed subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	Pretty,
	Json,
}

impl Default for LogFormat {
	fn default() -> Self {
		LogFormat::Pretty
	}
}

/// Installs a global subscriber. `directive` is an `EnvFilter` string such
/// as `"cowrie_enrich=debug,sqlx=warn"`; `format` selects human-readable vs
/// newline-delimited JSON output for log aggregation.
pub fn init(directive: &str, format: LogFormat) -> Result<(), InitError> {
	let filter = EnvFilter::try_new(directive).map_err(|e| InitError(e.to_string()))?;
	let registry = tracing_subscriber::registry().with(filter);
	let result = match format {
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.try_init(),
	};
	result.map_err(|e| InitError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("failed to initialize logging: {0}")]
pub struct InitError(pub String);
