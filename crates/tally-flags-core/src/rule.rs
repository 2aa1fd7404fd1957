// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting rules and their attribute conditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlagsError, Result};
use crate::evaluation::{EvaluationContext, WELL_KNOWN_ATTRIBUTES};
use crate::flag::FlagValue;

/// An ordered targeting rule. Position in the flag's rule list is its priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// All conditions must hold. An empty list matches every context.
	#[serde(default)]
	pub conditions: Vec<Condition>,
	/// 0-100. 100 means everyone meeting the conditions.
	pub rollout_percentage: u32,
	pub value: FlagValue,
}

impl TargetingRule {
	/// A rule without conditions that rolls `value` out to `rollout_percentage`.
	pub fn everyone(rollout_percentage: u32, value: FlagValue) -> Self {
		Self {
			description: None,
			conditions: Vec::new(),
			rollout_percentage,
			value,
		}
	}

	pub fn validate(&self, index: usize) -> Result<()> {
		if self.rollout_percentage > 100 {
			return Err(FlagsError::InvalidRollout {
				index,
				percentage: self.rollout_percentage,
			});
		}
		for condition in &self.conditions {
			condition
				.validate()
				.map_err(|reason| FlagsError::InvalidRule { index, reason })?;
		}
		Ok(())
	}

	/// Whether every condition holds for `context`. Rollout is not considered.
	pub fn conditions_match(&self, context: &EvaluationContext) -> bool {
		self.conditions.iter().all(|c| c.matches(context))
	}
}

/// A predicate over one context attribute, typed by the attribute's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
	String {
		attribute: String,
		operator: StringOperator,
		values: Vec<String>,
	},
	Number {
		attribute: String,
		operator: NumberOperator,
		value: f64,
	},
	Boolean {
		attribute: String,
		value: bool,
	},
	Set {
		attribute: String,
		operator: SetOperator,
		values: Vec<String>,
	},
}

impl Condition {
	pub fn attribute(&self) -> &str {
		match self {
			Condition::String { attribute, .. }
			| Condition::Number { attribute, .. }
			| Condition::Boolean { attribute, .. }
			| Condition::Set { attribute, .. } => attribute,
		}
	}

	/// Returns a human-readable reason when the condition is malformed.
	pub fn validate(&self) -> std::result::Result<(), String> {
		let attribute = self.attribute();
		if attribute.trim().is_empty() {
			return Err("condition attribute cannot be empty".to_string());
		}

		let well_known = WELL_KNOWN_ATTRIBUTES.contains(&attribute);
		match self {
			Condition::String { values, .. } | Condition::Set { values, .. } => {
				if values.is_empty() {
					return Err(format!("condition on '{attribute}' has no values"));
				}
			}
			Condition::Number { value, .. } => {
				if !value.is_finite() {
					return Err(format!("condition on '{attribute}' has a non-finite number"));
				}
				if well_known {
					return Err(format!("'{attribute}' is a string attribute"));
				}
			}
			Condition::Boolean { .. } => {
				if well_known {
					return Err(format!("'{attribute}' is a string attribute"));
				}
			}
		}
		Ok(())
	}

	/// Missing attributes and incompatible types evaluate to false.
	pub fn matches(&self, context: &EvaluationContext) -> bool {
		let Some(actual) = context.resolve_attribute(self.attribute()) else {
			return false;
		};

		match self {
			Condition::String {
				operator, values, ..
			} => operator.evaluate(&actual, values),
			Condition::Number {
				operator, value, ..
			} => operator.evaluate(&actual, *value),
			Condition::Boolean { value, .. } => match as_bool(&actual) {
				Some(b) => b == *value,
				None => false,
			},
			Condition::Set {
				operator, values, ..
			} => operator.evaluate(&actual, values),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
	Equals,
	NotEquals,
	Contains,
	NotContains,
	StartsWith,
	EndsWith,
}

impl StringOperator {
	pub fn is_negated(&self) -> bool {
		matches!(self, StringOperator::NotEquals | StringOperator::NotContains)
	}

	/// Case-insensitive. Positive operators match when any value matches;
	/// negated operators match when none does. Non-string actuals never match.
	pub fn evaluate(&self, actual: &Value, expected: &[String]) -> bool {
		let Value::String(actual) = actual else {
			return false;
		};
		let actual = actual.to_lowercase();

		let any = expected.iter().any(|e| {
			let e = e.to_lowercase();
			match self {
				StringOperator::Equals | StringOperator::NotEquals => actual == e,
				StringOperator::Contains | StringOperator::NotContains => actual.contains(&e),
				StringOperator::StartsWith => actual.starts_with(&e),
				StringOperator::EndsWith => actual.ends_with(&e),
			}
		});

		if self.is_negated() { !any } else { any }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberOperator {
	Eq,
	Neq,
	Gt,
	Gte,
	Lt,
	Lte,
}

impl NumberOperator {
	pub fn evaluate(&self, actual: &Value, expected: f64) -> bool {
		let Some(actual) = as_number(actual) else {
			return false;
		};
		match self {
			NumberOperator::Eq => actual == expected,
			NumberOperator::Neq => actual != expected,
			NumberOperator::Gt => actual > expected,
			NumberOperator::Gte => actual >= expected,
			NumberOperator::Lt => actual < expected,
			NumberOperator::Lte => actual <= expected,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperator {
	In,
	NotIn,
}

impl SetOperator {
	/// Scalars are compared case-insensitively by their string rendering. An
	/// array actual is `in` when any element is a member.
	pub fn evaluate(&self, actual: &Value, members: &[String]) -> bool {
		let is_member = |s: &str| members.iter().any(|m| m.eq_ignore_ascii_case(s));

		let found = match actual {
			Value::Array(items) => {
				let mut found = false;
				for item in items {
					match scalar_string(item) {
						Some(s) => found |= is_member(&s),
						None => return false,
					}
				}
				found
			}
			other => match scalar_string(other) {
				Some(s) => is_member(&s),
				None => return false,
			},
		};

		match self {
			SetOperator::In => found,
			SetOperator::NotIn => !found,
		}
	}
}

fn scalar_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

fn as_number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
		_ => None,
	}
}

fn as_bool(value: &Value) -> Option<bool> {
	match value {
		Value::Bool(b) => Some(*b),
		Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
		Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn ctx() -> EvaluationContext {
		EvaluationContext::new()
			.with_user_id("user-42")
			.with_tenant_id("acme")
			.with_attribute("plan", json!("Enterprise"))
			.with_attribute("seats", json!(25))
			.with_attribute("beta", json!(true))
			.with_attribute("country", json!("DE"))
			.with_attribute("roles", json!(["admin", "billing"]))
	}

	fn string(attr: &str, op: StringOperator, values: &[&str]) -> Condition {
		Condition::String {
			attribute: attr.to_string(),
			operator: op,
			values: values.iter().map(|v| v.to_string()).collect(),
		}
	}

	#[test]
	fn string_equals_is_case_insensitive() {
		assert!(string("plan", StringOperator::Equals, &["enterprise"]).matches(&ctx()));
		assert!(!string("plan", StringOperator::NotEquals, &["ENTERPRISE"]).matches(&ctx()));
	}

	#[test]
	fn string_operators_any_and_none() {
		assert!(string("plan", StringOperator::Contains, &["xyz", "prise"]).matches(&ctx()));
		assert!(string("plan", StringOperator::NotContains, &["free", "pro "]).matches(&ctx()));
		assert!(string("plan", StringOperator::StartsWith, &["ent"]).matches(&ctx()));
		assert!(string("plan", StringOperator::EndsWith, &["prise"]).matches(&ctx()));
	}

	#[test]
	fn missing_attribute_is_false_even_for_negated_operators() {
		assert!(!string("region", StringOperator::Equals, &["eu"]).matches(&ctx()));
		assert!(!string("region", StringOperator::NotEquals, &["eu"]).matches(&ctx()));
	}

	#[test]
	fn incompatible_type_is_false() {
		assert!(!string("seats", StringOperator::Equals, &["25"]).matches(&ctx()));
		let cond = Condition::Number {
			attribute: "plan".to_string(),
			operator: NumberOperator::Gt,
			value: 1.0,
		};
		assert!(!cond.matches(&ctx()));
	}

	#[test]
	fn number_operators() {
		let cond = |op, value| Condition::Number {
			attribute: "seats".to_string(),
			operator: op,
			value,
		};
		assert!(cond(NumberOperator::Gte, 25.0).matches(&ctx()));
		assert!(cond(NumberOperator::Lt, 100.0).matches(&ctx()));
		assert!(!cond(NumberOperator::Gt, 25.0).matches(&ctx()));
		assert!(cond(NumberOperator::Neq, 3.0).matches(&ctx()));
	}

	#[test]
	fn numeric_strings_are_numbers() {
		assert!(NumberOperator::Eq.evaluate(&json!("12.5"), 12.5));
		assert!(!NumberOperator::Eq.evaluate(&json!("NaN"), 0.0));
	}

	#[test]
	fn boolean_condition_accepts_string_booleans() {
		let cond = Condition::Boolean {
			attribute: "beta".to_string(),
			value: true,
		};
		assert!(cond.matches(&ctx()));
		let ctx = EvaluationContext::new().with_attribute("beta", json!("TRUE"));
		assert!(cond.matches(&ctx));
	}

	#[test]
	fn set_membership_with_scalars_and_arrays() {
		let set = |attr: &str, op, values: &[&str]| Condition::Set {
			attribute: attr.to_string(),
			operator: op,
			values: values.iter().map(|v| v.to_string()).collect(),
		};
		assert!(set("country", SetOperator::In, &["de", "fr"]).matches(&ctx()));
		assert!(set("country", SetOperator::NotIn, &["us"]).matches(&ctx()));
		assert!(set("roles", SetOperator::In, &["admin"]).matches(&ctx()));
		assert!(!set("roles", SetOperator::NotIn, &["billing"]).matches(&ctx()));
		assert!(set("seats", SetOperator::In, &["25"]).matches(&ctx()));
	}

	#[test]
	fn well_known_attributes_resolve_from_ids() {
		assert!(string("user_id", StringOperator::Equals, &["user-42"]).matches(&ctx()));
		let cond = Condition::Set {
			attribute: "tenant_id".to_string(),
			operator: SetOperator::In,
			values: vec!["acme".to_string()],
		};
		assert!(cond.matches(&ctx()));
	}

	#[test]
	fn validation_rejects_malformed_conditions() {
		assert!(string("", StringOperator::Equals, &["a"]).validate().is_err());
		assert!(string("plan", StringOperator::Equals, &[]).validate().is_err());
		let nan = Condition::Number {
			attribute: "seats".to_string(),
			operator: NumberOperator::Eq,
			value: f64::NAN,
		};
		assert!(nan.validate().is_err());
		let typed = Condition::Boolean {
			attribute: "user_id".to_string(),
			value: true,
		};
		assert!(typed.validate().is_err());
	}

	#[test]
	fn rollout_over_100_is_rejected() {
		let rule = TargetingRule::everyone(101, FlagValue::Boolean(true));
		assert_eq!(
			rule.validate(3),
			Err(FlagsError::InvalidRollout {
				index: 3,
				percentage: 101
			})
		);
	}

	#[test]
	fn condition_serde_shape() {
		let json = serde_json::to_value(string("plan", StringOperator::StartsWith, &["ent"])).unwrap();
		assert_eq!(
			json,
			json!({"type": "string", "attribute": "plan", "operator": "starts_with", "values": ["ent"]})
		);
	}
}
