// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags server implementation for Tally.
//!
//! This crate provides the server-side half of the flags engine: persistence,
//! rule evaluation, the snapshot cache and the two services built on them.
//!
//! # Architecture
//!
//! - `repository` - Flag and override stores with a SQLite implementation
//! - `evaluation` - Pure rule evaluator and percentage bucketing
//! - `cache` - Immutable snapshots of flags and active overrides
//! - `service` - Single, batch and client-config evaluation
//! - `admin` - Flag and override administration with audited, versioned writes
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tally_server_flags::{EvaluationContext, EvaluationService, FlagCache};
//!
//! let flags = Arc::new(SqliteFlagStore::new(pool.clone()));
//! let overrides = Arc::new(SqliteOverrideStore::new(pool));
//! let cache = Arc::new(FlagCache::new(10_000, Duration::from_secs(300)));
//! let service = EvaluationService::new(flags, overrides, cache, config.flags);
//!
//! let context = EvaluationContext::new().with_user_id("user123");
//! let result = service.evaluate("checkout.new_flow", &context).await?;
//! ```

pub mod admin;
pub mod cache;
pub mod error;
pub mod evaluation;
pub mod repository;
pub mod schema;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::FlagAdminService;
pub use cache::FlagCache;
pub use error::{ErrorKind, FlagsServerError, Result};
pub use evaluation::{bucket, evaluate_flag, evaluate_percentage, evaluate_rules, RuleOutcome};
pub use repository::{
	FlagFilter, FlagPage, FlagStore, OverrideStore, SqliteFlagStore, SqliteOverrideStore,
};
pub use schema::run_migrations;
pub use service::{BatchError, BatchEvaluation, EvaluationService};

// Re-export core types for convenience
pub use tally_flags_core::*;
