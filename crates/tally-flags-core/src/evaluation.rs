// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flag::FlagValue;
use crate::overrides::OverrideTarget;

/// Bucketing identifier used when a context carries neither a user nor a tenant.
pub const ANONYMOUS: &str = "anonymous";

pub const USER_ID_ATTRIBUTE: &str = "user_id";
pub const TENANT_ID_ATTRIBUTE: &str = "tenant_id";

/// Attributes resolved from the context's identifiers instead of its map.
pub const WELL_KNOWN_ATTRIBUTES: [&str; 2] = [USER_ID_ATTRIBUTE, TENANT_ID_ATTRIBUTE];

/// Per-request evaluation input. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub tenant_id: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant_id.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Looks up an attribute. `user_id` and `tenant_id` come from the
	/// identifiers; everything else from the attribute map.
	pub fn resolve_attribute(&self, name: &str) -> Option<Value> {
		match name {
			USER_ID_ATTRIBUTE => self.user_id.clone().map(Value::String),
			TENANT_ID_ATTRIBUTE => self.tenant_id.clone().map(Value::String),
			_ => self.attributes.get(name).cloned(),
		}
	}

	/// Identifier used for percentage bucketing: user, then tenant, then
	/// [`ANONYMOUS`].
	pub fn bucketing_identifier(&self) -> &str {
		self
			.user_id
			.as_deref()
			.or(self.tenant_id.as_deref())
			.unwrap_or(ANONYMOUS)
	}
}

/// Why an evaluation produced its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationReason {
	Override { target: OverrideTarget },
	RuleMatch { rule_index: usize },
	Default,
	FlagDisabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
	pub flag_key: String,
	pub value: FlagValue,
	/// Set when `value` is a variant.
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	pub flag_version: i64,
}

impl EvaluationResult {
	pub fn new(
		flag_key: impl Into<String>,
		value: FlagValue,
		reason: EvaluationReason,
		flag_version: i64,
	) -> Self {
		let variant = value.variant().map(str::to_string);
		Self {
			flag_key: flag_key.into(),
			value,
			variant,
			reason,
			flag_version,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.value.is_enabled()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn bucketing_identifier_prefers_user_then_tenant() {
		let ctx = EvaluationContext::new().with_tenant_id("acme").with_user_id("u1");
		assert_eq!(ctx.bucketing_identifier(), "u1");

		let ctx = EvaluationContext::new().with_tenant_id("acme");
		assert_eq!(ctx.bucketing_identifier(), "acme");

		assert_eq!(EvaluationContext::new().bucketing_identifier(), ANONYMOUS);
	}

	#[test]
	fn well_known_attributes_shadow_the_map() {
		let ctx = EvaluationContext::new()
			.with_user_id("u1")
			.with_attribute("user_id", json!("spoofed"));
		assert_eq!(ctx.resolve_attribute("user_id"), Some(json!("u1")));
		assert_eq!(ctx.resolve_attribute("tenant_id"), None);
	}

	#[test]
	fn result_sets_variant_for_variant_values() {
		let result = EvaluationResult::new(
			"pricing.layout",
			FlagValue::Variant("compact".to_string()),
			EvaluationReason::RuleMatch { rule_index: 0 },
			3,
		);
		assert_eq!(result.variant.as_deref(), Some("compact"));

		let result = EvaluationResult::new(
			"new_checkout",
			FlagValue::Boolean(false),
			EvaluationReason::FlagDisabled,
			1,
		);
		assert_eq!(result.variant, None);
		assert!(!result.is_enabled());
	}

	#[test]
	fn reason_serde_shape() {
		let json = serde_json::to_value(EvaluationReason::Override {
			target: OverrideTarget::Tenant,
		})
		.unwrap();
		assert_eq!(json, json!({"type": "override", "target": "tenant"}));
	}
}
