#![forbid(unsafe_code)]

use pantry_store::StoreError;
use thiserror::Error;

/// Error taxonomy surfaced by the conversation core.
///
/// `NotFound` and `Forbidden` are deliberately generic: callers must not be
/// able to distinguish "does not exist" from "not visible to you", and a
/// denied capability is logged, never returned.
#[derive(Debug, Error)]
pub enum ChatError {
	#[error("invalid {field}: {reason}")]
	Validation { field: &'static str, reason: String },

	#[error("not found")]
	NotFound,

	#[error("access denied")]
	Forbidden,

	#[error("conflict: {0}")]
	Conflict(String),

	#[error(transparent)]
	Store(#[from] StoreError),
}

impl ChatError {
	pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
		ChatError::Validation {
			field,
			reason: reason.into(),
		}
	}

	/// Stable machine-readable code for protocol error frames.
	pub fn code(&self) -> &'static str {
		match self {
			ChatError::Validation { .. } => "validation",
			ChatError::NotFound => "not_found",
			ChatError::Forbidden => "forbidden",
			ChatError::Conflict(_) => "conflict",
			ChatError::Store(_) => "store",
		}
	}
}
