//! A single error taxonomy shared by every external provider so the
//! cascade can react uniformly (§7): transient failures are worth a retry
//! somewhere upstream, `Auth`/`QuotaExhausted` degrade a client to a
//! permanent no-op, `NotFound` is a successful "absent" answer carried as
//! `Ok(None)` rather than an error at the call site, and `Malformed`
//! means the upstream service answered but the payload didn't parse.

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
	#[error("transient failure calling {provider}: {detail}")]
	Transient { provider: &'static str, detail: String },
	#[error("authentication rejected by {provider}")]
	Auth { provider: &'static str },
	#[error("daily quota exhausted for {provider}")]
	QuotaExhausted { provider: &'static str },
	#[error("{provider} response did not parse: {detail}")]
	Malformed { provider: &'static str, detail: String },
}

impl ProviderError {
	pub fn is_auth(&self) -> bool {
		matches!(self, ProviderError::Auth { .. })
	}
}
