// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Cursor;

use chrono::{DateTime, Utc};
use murmur3::murmur3_32;
use tally_flags_core::{
	effective_override, EvaluationContext, EvaluationReason, EvaluationResult, FeatureFlag,
	FlagStatus, FlagValue, Override, OverrideTarget,
};

/// Outcome of running a flag's targeting rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
	pub value: FlagValue,
	/// Index of the first rule that matched, `None` when the default applied.
	pub matched_rule: Option<usize>,
}

/// Steps tried in order when resolving a flag. The first step that produces
/// a result wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
	UserOverride,
	TenantOverride,
	DisabledCheck,
	Rules,
}

pub const RESOLUTION_ORDER: [ResolutionStep; 4] = [
	ResolutionStep::UserOverride,
	ResolutionStep::TenantOverride,
	ResolutionStep::DisabledCheck,
	ResolutionStep::Rules,
];

impl ResolutionStep {
	fn resolve(
		self,
		flag: &FeatureFlag,
		overrides: &[Override],
		context: &EvaluationContext,
		now: DateTime<Utc>,
	) -> Option<EvaluationResult> {
		match self {
			ResolutionStep::UserOverride => {
				resolve_override(flag, overrides, OverrideTarget::User, context.user_id.as_deref(), now)
			}
			ResolutionStep::TenantOverride => resolve_override(
				flag,
				overrides,
				OverrideTarget::Tenant,
				context.tenant_id.as_deref(),
				now,
			),
			ResolutionStep::DisabledCheck => (flag.status != FlagStatus::Enabled).then(|| {
				EvaluationResult::new(
					&flag.key,
					flag.default_value.clone(),
					EvaluationReason::FlagDisabled,
					flag.version,
				)
			}),
			ResolutionStep::Rules => {
				let outcome = evaluate_rules(flag, context);
				let reason = match outcome.matched_rule {
					Some(rule_index) => EvaluationReason::RuleMatch { rule_index },
					None => EvaluationReason::Default,
				};
				Some(EvaluationResult::new(
					&flag.key,
					outcome.value,
					reason,
					flag.version,
				))
			}
		}
	}
}

fn resolve_override(
	flag: &FeatureFlag,
	overrides: &[Override],
	target: OverrideTarget,
	target_id: Option<&str>,
	now: DateTime<Utc>,
) -> Option<EvaluationResult> {
	let found = effective_override(overrides, target, target_id?, now)?;
	Some(EvaluationResult::new(
		&flag.key,
		found.value.clone(),
		EvaluationReason::Override { target },
		flag.version,
	))
}

/// Evaluates a flag for a given context.
///
/// The resolution order is:
/// 1. Active user override
/// 2. Active tenant override
/// 3. Flag status (anything but enabled yields the default value)
/// 4. Targeting rules, first match wins
/// 5. Default value
///
/// Archived flags must be rejected by the caller before getting here.
pub fn evaluate_flag(
	flag: &FeatureFlag,
	overrides: &[Override],
	context: &EvaluationContext,
	now: DateTime<Utc>,
) -> EvaluationResult {
	RESOLUTION_ORDER
		.iter()
		.find_map(|step| step.resolve(flag, overrides, context, now))
		.unwrap_or_else(|| {
			EvaluationResult::new(
				&flag.key,
				flag.default_value.clone(),
				EvaluationReason::Default,
				flag.version,
			)
		})
}

/// Runs targeting rules in order. A rule matches when all its conditions
/// hold and the context's bucket falls under its rollout percentage.
pub fn evaluate_rules(flag: &FeatureFlag, context: &EvaluationContext) -> RuleOutcome {
	let identifier = context.bucketing_identifier();

	for (index, rule) in flag.rules.iter().enumerate() {
		if !rule.conditions_match(context) {
			continue;
		}
		if !evaluate_percentage(identifier, &flag.key, rule.rollout_percentage) {
			continue;
		}
		return RuleOutcome {
			value: rule.value.clone(),
			matched_rule: Some(index),
		};
	}

	RuleOutcome {
		value: flag.default_value.clone(),
		matched_rule: None,
	}
}

/// Stable bucket in `0..100` for an identifier on a flag.
pub fn bucket(identifier: &str, flag_key: &str) -> u32 {
	let input = format!("{}.{}", flag_key, identifier);
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
	hash % 100
}

/// Evaluates percentage-based targeting using consistent hashing.
pub fn evaluate_percentage(identifier: &str, flag_key: &str, percentage: u32) -> bool {
	bucket(identifier, flag_key) < percentage
}


#[cfg(test)]
mod proptest_tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn percentage_is_deterministic(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}", pct in 0u32..=100) {
			let result1 = evaluate_percentage(&user_id, &flag_key, pct);
			let result2 = evaluate_percentage(&user_id, &flag_key, pct);
			prop_assert_eq!(result1, result2);
		}

		#[test]
		fn percentage_monotonic(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}", low in 0u32..=100, high in 0u32..=100) {
			let (low, high) = if low <= high { (low, high) } else { (high, low) };
			if evaluate_percentage(&user_id, &flag_key, low) {
				prop_assert!(evaluate_percentage(&user_id, &flag_key, high),
					"included at {}% but not at {}%", low, high);
			}
		}

		#[test]
		fn bucket_is_in_range(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}") {
			prop_assert!(bucket(&user_id, &flag_key) < 100);
		}

		#[test]
		fn percentage_zero_never_includes(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}") {
			prop_assert!(!evaluate_percentage(&user_id, &flag_key, 0));
		}

		#[test]
		fn percentage_hundred_always_includes(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}") {
			prop_assert!(evaluate_percentage(&user_id, &flag_key, 100));
		}
	}
}
