// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::FlagKind;

pub type Result<T> = std::result::Result<T, FlagsError>;

/// Validation failures raised while building or changing flag definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlagsError {
	#[error("invalid flag key '{0}': must be 1-100 chars of [a-z0-9_.-] starting with a lowercase letter")]
	InvalidKey(String),

	#[error("invalid flag name: {0}")]
	InvalidName(String),

	#[error("{context} value does not fit a {kind} flag")]
	ValueKindMismatch { kind: FlagKind, context: String },

	#[error("variant '{0}' is not declared on this flag")]
	UnknownVariant(String),

	#[error("invalid variant declaration: {0}")]
	InvalidVariants(String),

	#[error("rule {index}: {reason}")]
	InvalidRule { index: usize, reason: String },

	#[error("rule {index}: rollout percentage {percentage} is outside 0-100")]
	InvalidRollout { index: usize, percentage: u32 },

	#[error("update changes nothing")]
	EmptyUpdate,

	#[error("invalid override: {0}")]
	InvalidOverride(String),

	#[error("unknown {field} '{value}'")]
	UnknownEnumValue { field: &'static str, value: String },
}
