// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlagsError, Result};
use crate::flag::{FeatureFlag, FlagValue, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideId(pub Uuid);

impl OverrideId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for OverrideId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OverrideId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for OverrideId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Scope of an override. User overrides take precedence over tenant overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideTarget {
	User,
	Tenant,
}

impl OverrideTarget {
	pub fn as_str(&self) -> &'static str {
		match self {
			OverrideTarget::User => "user",
			OverrideTarget::Tenant => "tenant",
		}
	}
}

impl fmt::Display for OverrideTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OverrideTarget {
	type Err = FlagsError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"user" => Ok(OverrideTarget::User),
			"tenant" => Ok(OverrideTarget::Tenant),
			other => Err(FlagsError::UnknownEnumValue {
				field: "override target",
				value: other.to_string(),
			}),
		}
	}
}

/// A forced value for one user or tenant on one flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
	pub id: OverrideId,
	pub flag_key: String,
	pub target: OverrideTarget,
	pub target_id: String,
	pub value: FlagValue,
	pub reason: String,
	pub expires_at: Option<DateTime<Utc>>,
	pub created_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
}

impl Override {
	/// An override whose expiry is strictly before `now` is inert.
	pub fn is_active(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.map_or(true, |expires_at| expires_at >= now)
	}

	pub fn applies_to(&self, target: OverrideTarget, target_id: &str) -> bool {
		self.target == target && self.target_id == target_id
	}
}

/// Input for creating an override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOverride {
	pub target: OverrideTarget,
	pub target_id: String,
	pub value: FlagValue,
	#[serde(default)]
	pub reason: String,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}

impl NewOverride {
	/// Validates against the owning flag and builds the override.
	pub fn into_override(
		self,
		flag: &FeatureFlag,
		actor: Option<UserId>,
		now: DateTime<Utc>,
	) -> Result<Override> {
		let target_id = self.target_id.trim().to_string();
		if target_id.is_empty() {
			return Err(FlagsError::InvalidOverride(
				"target id cannot be empty".to_string(),
			));
		}
		if let Some(expires_at) = self.expires_at {
			if expires_at <= now {
				return Err(FlagsError::InvalidOverride(
					"expiry must be in the future".to_string(),
				));
			}
		}
		flag.validate_value(&self.value, "override")?;

		Ok(Override {
			id: OverrideId::new(),
			flag_key: flag.key.clone(),
			target: self.target,
			target_id,
			value: self.value,
			reason: self.reason.trim().to_string(),
			expires_at: self.expires_at,
			created_by: actor,
			created_at: now,
		})
	}
}

/// Picks the effective override for a target: the newest active one.
pub fn effective_override<'a>(
	overrides: &'a [Override],
	target: OverrideTarget,
	target_id: &str,
	now: DateTime<Utc>,
) -> Option<&'a Override> {
	overrides
		.iter()
		.filter(|o| o.applies_to(target, target_id) && o.is_active(now))
		.max_by_key(|o| o.created_at)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::flag::{FlagKind, NewFlag};
	use chrono::Duration;

	fn flag() -> FeatureFlag {
		NewFlag {
			key: "new_checkout".to_string(),
			name: "New checkout".to_string(),
			description: None,
			kind: FlagKind::Percentage,
			default_value: FlagValue::Boolean(false),
			variants: vec![],
			rules: vec![],
			tags: vec![],
		}
		.into_flag(None, Utc::now())
		.unwrap()
	}

	fn new_override(expires_at: Option<DateTime<Utc>>) -> NewOverride {
		NewOverride {
			target: OverrideTarget::User,
			target_id: "u1".to_string(),
			value: FlagValue::Boolean(true),
			reason: "support ticket".to_string(),
			expires_at,
		}
	}

	#[test]
	fn expiry_boundary_is_inclusive() {
		let now = Utc::now();
		let o = new_override(Some(now + Duration::hours(1)))
			.into_override(&flag(), None, now)
			.unwrap();
		assert!(o.is_active(now));
		assert!(o.is_active(now + Duration::hours(1)));
		assert!(!o.is_active(now + Duration::hours(1) + Duration::milliseconds(1)));
	}

	#[test]
	fn past_expiry_is_rejected() {
		let now = Utc::now();
		let err = new_override(Some(now - Duration::seconds(1)))
			.into_override(&flag(), None, now)
			.unwrap_err();
		assert!(matches!(err, FlagsError::InvalidOverride(_)));
	}

	#[test]
	fn value_must_match_flag_kind() {
		let mut input = new_override(None);
		input.value = FlagValue::Variant("on".to_string());
		let err = input.into_override(&flag(), None, Utc::now()).unwrap_err();
		assert!(matches!(err, FlagsError::ValueKindMismatch { .. }));
	}

	#[test]
	fn newest_active_override_wins() {
		let now = Utc::now();
		let flag = flag();
		let older = new_override(None)
			.into_override(&flag, None, now - Duration::minutes(5))
			.unwrap();
		let mut newer_input = new_override(None);
		newer_input.value = FlagValue::Boolean(false);
		let newer = newer_input.into_override(&flag, None, now).unwrap();
		let mut expired = new_override(Some(now + Duration::minutes(1)))
			.into_override(&flag, None, now)
			.unwrap();
		expired.created_at = now + Duration::seconds(1);
		expired.expires_at = Some(now - Duration::seconds(1));

		let all = vec![older, newer.clone(), expired];
		let picked = effective_override(&all, OverrideTarget::User, "u1", now).unwrap();
		assert_eq!(picked.id, newer.id);
		assert!(effective_override(&all, OverrideTarget::Tenant, "u1", now).is_none());
	}
}
