// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Tally feature flags engine.
//!
//! This crate holds the domain model shared by the evaluation and admin
//! services (`tally-server-flags`) and the `tally-flags` binary. It performs
//! no I/O.
//!
//! # Overview
//!
//! - Four flag kinds: boolean, percentage rollout, variant and user segment
//! - Ordered targeting rules, first match wins
//! - Typed attribute conditions over string, number, boolean and set values
//! - Per-user and per-tenant overrides with optional expiry
//!
//! # Example
//!
//! ```
//! use tally_flags_core::{
//!     EvaluationContext, EvaluationReason, EvaluationResult, FlagValue,
//! };
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_tenant_id("acme")
//!     .with_attribute("plan", serde_json::json!("enterprise"));
//! assert_eq!(ctx.bucketing_identifier(), "user123");
//!
//! let result = EvaluationResult::new(
//!     "checkout.new_flow",
//!     FlagValue::Boolean(true),
//!     EvaluationReason::Default,
//!     1,
//! );
//! assert!(result.is_enabled());
//! ```

pub mod error;
pub mod evaluation;
pub mod flag;
pub mod overrides;
pub mod page;
pub mod rule;

pub use error::{FlagsError, Result};
pub use evaluation::{
	EvaluationContext, EvaluationReason, EvaluationResult, ANONYMOUS, TENANT_ID_ATTRIBUTE,
	USER_ID_ATTRIBUTE,
};
pub use flag::{
	normalize_tags, FeatureFlag, FlagKind, FlagPatch, FlagStatus, FlagValue, NewFlag, UserId,
};
pub use overrides::{effective_override, NewOverride, Override, OverrideId, OverrideTarget};
pub use page::{Page, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use rule::{Condition, NumberOperator, SetOperator, StringOperator, TargetingRule};
