// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use tally_flags_core::FlagsError;
use tally_server_audit::AuditError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlagsServerError>;

#[derive(Debug, Error)]
pub enum FlagsServerError {
	#[error("{entity} not found: {id}")]
	NotFound { entity: &'static str, id: String },

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("invalid state: {0}")]
	InvalidState(String),

	#[error("validation failed: {0}")]
	Validation(#[from] FlagsError),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("audit error: {0}")]
	Audit(#[from] AuditError),

	#[error("internal error: {0}")]
	Internal(String),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	NotFound,
	Conflict,
	InvalidState,
	Validation,
	Internal,
}

impl FlagsServerError {
	pub fn flag_not_found(key: impl Into<String>) -> Self {
		FlagsServerError::NotFound {
			entity: "flag",
			id: key.into(),
		}
	}

	pub fn override_not_found(id: impl ToString) -> Self {
		FlagsServerError::NotFound {
			entity: "override",
			id: id.to_string(),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			FlagsServerError::NotFound { .. } => ErrorKind::NotFound,
			FlagsServerError::Conflict(_) => ErrorKind::Conflict,
			FlagsServerError::InvalidState(_) => ErrorKind::InvalidState,
			FlagsServerError::Validation(_) => ErrorKind::Validation,
			FlagsServerError::Database(_)
			| FlagsServerError::Serialization(_)
			| FlagsServerError::Audit(_)
			| FlagsServerError::Internal(_) => ErrorKind::Internal,
		}
	}

	pub fn is_not_found(&self) -> bool {
		self.kind() == ErrorKind::NotFound
	}

	pub fn is_conflict(&self) -> bool {
		self.kind() == ErrorKind::Conflict
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_classify_domain_and_infrastructure_errors() {
		assert_eq!(
			FlagsServerError::flag_not_found("x").kind(),
			ErrorKind::NotFound
		);
		assert_eq!(
			FlagsServerError::from(FlagsError::InvalidKey("X".to_string())).kind(),
			ErrorKind::Validation
		);
		assert_eq!(
			FlagsServerError::from(sqlx::Error::RowNotFound).kind(),
			ErrorKind::Internal
		);
	}

	#[test]
	fn not_found_message_names_entity() {
		let err = FlagsServerError::flag_not_found("new_checkout");
		assert_eq!(err.to_string(), "flag not found: new_checkout");
	}
}
