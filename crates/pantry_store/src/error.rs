#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors surfaced by entity store backends.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("stored value could not be decoded: {0}")]
	Decode(String),
}
