// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlagsError, Result};
use crate::rule::TargetingRule;

const MAX_KEY_LEN: usize = 100;
const MAX_NAME_LEN: usize = 200;

/// Identifier of the user performing an administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for UserId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for UserId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// The four supported flag kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
	Boolean,
	Percentage,
	Variant,
	UserSegment,
}

impl FlagKind {
	/// Whether `value` has the type this kind evaluates to.
	pub fn accepts(&self, value: &FlagValue) -> bool {
		match self {
			FlagKind::Variant => matches!(value, FlagValue::Variant(_)),
			FlagKind::Boolean | FlagKind::Percentage | FlagKind::UserSegment => {
				matches!(value, FlagValue::Boolean(_))
			}
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			FlagKind::Boolean => "boolean",
			FlagKind::Percentage => "percentage",
			FlagKind::Variant => "variant",
			FlagKind::UserSegment => "user_segment",
		}
	}
}

impl fmt::Display for FlagKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for FlagKind {
	type Err = FlagsError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"boolean" => Ok(FlagKind::Boolean),
			"percentage" => Ok(FlagKind::Percentage),
			"variant" => Ok(FlagKind::Variant),
			"user_segment" => Ok(FlagKind::UserSegment),
			other => Err(FlagsError::UnknownEnumValue {
				field: "flag kind",
				value: other.to_string(),
			}),
		}
	}
}

/// Lifecycle status. `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
	Enabled,
	Disabled,
	Archived,
}

impl FlagStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			FlagStatus::Enabled => "enabled",
			FlagStatus::Disabled => "disabled",
			FlagStatus::Archived => "archived",
		}
	}

	/// No transition leaves `Archived`.
	pub fn can_transition_to(&self, next: FlagStatus) -> bool {
		!matches!(self, FlagStatus::Archived) || next == FlagStatus::Archived
	}
}

impl fmt::Display for FlagStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for FlagStatus {
	type Err = FlagsError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"enabled" => Ok(FlagStatus::Enabled),
			"disabled" => Ok(FlagStatus::Disabled),
			"archived" => Ok(FlagStatus::Archived),
			other => Err(FlagsError::UnknownEnumValue {
				field: "flag status",
				value: other.to_string(),
			}),
		}
	}
}

/// A kind-typed flag value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FlagValue {
	Boolean(bool),
	Variant(String),
}

impl FlagValue {
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Boolean(b) => Some(*b),
			FlagValue::Variant(_) => None,
		}
	}

	pub fn variant(&self) -> Option<&str> {
		match self {
			FlagValue::Variant(name) => Some(name),
			FlagValue::Boolean(_) => None,
		}
	}

	/// Truthiness for callers that only need on/off. A variant counts as on.
	pub fn is_enabled(&self) -> bool {
		match self {
			FlagValue::Boolean(b) => *b,
			FlagValue::Variant(_) => true,
		}
	}
}

impl fmt::Display for FlagValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlagValue::Boolean(b) => write!(f, "{b}"),
			FlagValue::Variant(name) => f.write_str(name),
		}
	}
}

/// A feature flag definition.
///
/// Values of this type are treated as immutable snapshots once published:
/// every change produces a new value with a bumped `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
	/// e.g., "checkout.new_flow"
	pub key: String,
	pub name: String,
	pub description: Option<String>,
	pub kind: FlagKind,
	pub default_value: FlagValue,
	/// Declared variant names; only used by `FlagKind::Variant`.
	#[serde(default)]
	pub variants: Vec<String>,
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	pub status: FlagStatus,
	pub version: i64,
	pub created_by: Option<UserId>,
	pub updated_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl FeatureFlag {
	/// Validates the flag key format.
	///
	/// - 1-100 characters
	/// - Pattern: `^[a-z][a-z0-9_.-]*$`
	pub fn validate_key(key: &str) -> bool {
		if key.is_empty() || key.len() > MAX_KEY_LEN {
			return false;
		}

		let mut chars = key.chars();

		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		chars.all(|c| {
			c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-'
		})
	}

	pub fn validate_name(name: &str) -> Result<()> {
		if name.trim().is_empty() {
			return Err(FlagsError::InvalidName("name cannot be empty".to_string()));
		}
		if name.chars().count() > MAX_NAME_LEN {
			return Err(FlagsError::InvalidName(format!(
				"name cannot exceed {MAX_NAME_LEN} characters"
			)));
		}
		Ok(())
	}

	/// Checks every definition-level invariant: key, name, typed default value,
	/// variant declarations and each targeting rule.
	pub fn validate(&self) -> Result<()> {
		if !Self::validate_key(&self.key) {
			return Err(FlagsError::InvalidKey(self.key.clone()));
		}
		Self::validate_name(&self.name)?;
		self.validate_variants()?;
		self.validate_value(&self.default_value, "default")?;

		for (index, rule) in self.rules.iter().enumerate() {
			rule.validate(index)?;
			self
				.validate_value(&rule.value, "rule")
				.map_err(|e| FlagsError::InvalidRule {
					index,
					reason: e.to_string(),
				})?;
		}

		Ok(())
	}

	/// Checks that `value` fits this flag's kind and, for variant flags, names
	/// a declared variant.
	pub fn validate_value(&self, value: &FlagValue, context: &str) -> Result<()> {
		if !self.kind.accepts(value) {
			return Err(FlagsError::ValueKindMismatch {
				kind: self.kind,
				context: context.to_string(),
			});
		}
		if let FlagValue::Variant(name) = value {
			if !self.declares_variant(name) {
				return Err(FlagsError::UnknownVariant(name.clone()));
			}
		}
		Ok(())
	}

	fn validate_variants(&self) -> Result<()> {
		match self.kind {
			FlagKind::Variant => {
				if self.variants.is_empty() {
					return Err(FlagsError::InvalidVariants(
						"variant flags must declare at least one variant".to_string(),
					));
				}
				let mut seen = BTreeSet::new();
				for name in &self.variants {
					if name.trim().is_empty() {
						return Err(FlagsError::InvalidVariants(
							"variant names cannot be empty".to_string(),
						));
					}
					if !seen.insert(name.as_str()) {
						return Err(FlagsError::InvalidVariants(format!(
							"duplicate variant '{name}'"
						)));
					}
				}
				Ok(())
			}
			_ if !self.variants.is_empty() => Err(FlagsError::InvalidVariants(format!(
				"{} flags cannot declare variants",
				self.kind
			))),
			_ => Ok(()),
		}
	}

	pub fn declares_variant(&self, name: &str) -> bool {
		self.variants.iter().any(|v| v == name)
	}

	pub fn is_archived(&self) -> bool {
		self.status == FlagStatus::Archived
	}

	pub fn is_enabled(&self) -> bool {
		self.status == FlagStatus::Enabled
	}

	pub fn has_tag(&self, tag: &str) -> bool {
		self.tags.contains(&tag.trim().to_lowercase())
	}

	/// Returns the next version of this flag with `status` applied.
	pub fn with_status(&self, status: FlagStatus, actor: Option<UserId>, now: DateTime<Utc>) -> Self {
		let mut next = self.clone();
		next.status = status;
		next.bump(actor, now);
		next
	}

	fn bump(&mut self, actor: Option<UserId>, now: DateTime<Utc>) {
		self.version += 1;
		self.updated_by = actor;
		self.updated_at = now;
	}
}

/// Normalizes tags: trimmed, lowercased, empty entries dropped, de-duplicated.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	tags
		.into_iter()
		.map(|t| t.as_ref().trim().to_lowercase())
		.filter(|t| !t.is_empty())
		.collect()
}

/// Input for creating a flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlag {
	pub key: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub kind: FlagKind,
	pub default_value: FlagValue,
	#[serde(default)]
	pub variants: Vec<String>,
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
	#[serde(default)]
	pub tags: Vec<String>,
}

impl NewFlag {
	/// Builds a validated, disabled flag at version 1.
	pub fn into_flag(self, actor: Option<UserId>, now: DateTime<Utc>) -> Result<FeatureFlag> {
		let flag = FeatureFlag {
			key: self.key,
			name: self.name,
			description: self.description.filter(|d| !d.trim().is_empty()),
			kind: self.kind,
			default_value: self.default_value,
			variants: self.variants,
			rules: self.rules,
			tags: normalize_tags(self.tags),
			status: FlagStatus::Disabled,
			version: 1,
			created_by: actor,
			updated_by: actor,
			created_at: now,
			updated_at: now,
		};
		flag.validate()?;
		Ok(flag)
	}
}

/// Partial update of a flag's definition. `None` leaves a field unchanged.
/// `rules` and `tags` replace the whole collection when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagPatch {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub default_value: Option<FlagValue>,
	#[serde(default)]
	pub variants: Option<Vec<String>>,
	#[serde(default)]
	pub rules: Option<Vec<TargetingRule>>,
	#[serde(default)]
	pub tags: Option<Vec<String>>,
}

impl FlagPatch {
	pub fn is_empty(&self) -> bool {
		self.name.is_none()
			&& self.description.is_none()
			&& self.default_value.is_none()
			&& self.variants.is_none()
			&& self.rules.is_none()
			&& self.tags.is_none()
	}

	/// Produces the next version of `flag` with this patch applied and the
	/// result re-validated as a whole.
	pub fn apply(
		&self,
		flag: &FeatureFlag,
		actor: Option<UserId>,
		now: DateTime<Utc>,
	) -> Result<FeatureFlag> {
		let mut next = flag.clone();
		if let Some(name) = &self.name {
			next.name = name.clone();
		}
		if let Some(description) = &self.description {
			next.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
		}
		if let Some(value) = &self.default_value {
			next.default_value = value.clone();
		}
		if let Some(variants) = &self.variants {
			next.variants = variants.clone();
		}
		if let Some(rules) = &self.rules {
			next.rules = rules.clone();
		}
		if let Some(tags) = &self.tags {
			next.tags = normalize_tags(tags);
		}
		next.validate()?;
		next.bump(actor, now);
		Ok(next)
	}
}
