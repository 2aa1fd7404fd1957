// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("failed to serialize audit snapshot: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("corrupt audit row {id}: {reason}")]
	CorruptRow { id: String, reason: String },
}
