//! `StoreError` separates conflicts a caller is expected to retry from
//! everything else, which the caller should propagate.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// A unique-constraint race the caller lost; re-read and retry (see the
	/// IP-inventory insert race handling).
	#[error("conflict on {0}: concurrent writer won, re-read and retry")]
	Conflict(String),
	#[error("schema version mismatch: expected {expected}, found {found}")]
	SchemaMismatch { expected: i32, found: i32 },
	#[error("row not found: {0}")]
	NotFound(String),
	#[error(transparent)]
	Fatal(#[from] sqlx::Error),
}

impl StoreError {
	/// True when the caller can reasonably retry the operation that
	/// produced this error (a lost unique-constraint race); false for
	/// anything that should propagate.
	pub fn is_retryable(&self) -> bool {
		matches!(self, StoreError::Conflict(_))
	}

	pub(crate) fn from_sqlx(table: &str, err: sqlx::Error) -> Self {
		if is_unique_violation(&err) {
			StoreError::Conflict(table.to_string())
		} else {
			StoreError::Fatal(err)
		}
	}
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
	matches!(err.as_database_error().and_then(|d| d.code()), Some(code) if code == "23505")
}
