// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit record types.
//!
//! - [`AuditAction`]: every administrative mutation that is recorded
//! - [`Actor`]: who performed it and from where
//! - [`AuditLogEntry`]: one append-only record with before/after snapshots
//! - [`AuditLogBuilder`]: fluent construction of entries

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_flags_core::UserId;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	Create,
	Update,
	Enable,
	Disable,
	Archive,
	OverrideCreate,
	OverrideDelete,
}

impl AuditAction {
	pub const ALL: [AuditAction; 7] = [
		AuditAction::Create,
		AuditAction::Update,
		AuditAction::Enable,
		AuditAction::Disable,
		AuditAction::Archive,
		AuditAction::OverrideCreate,
		AuditAction::OverrideDelete,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::Create => "create",
			AuditAction::Update => "update",
			AuditAction::Enable => "enable",
			AuditAction::Disable => "disable",
			AuditAction::Archive => "archive",
			AuditAction::OverrideCreate => "override_create",
			AuditAction::OverrideDelete => "override_delete",
		}
	}
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for AuditAction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		AuditAction::ALL
			.into_iter()
			.find(|a| a.as_str() == s)
			.ok_or_else(|| format!("unknown audit action '{s}'"))
	}
}

/// The caller behind a mutation. Supplied by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	pub user_id: Option<UserId>,
	pub ip_address: Option<String>,
	pub user_agent: Option<String>,
}

impl Actor {
	pub fn user(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
			..Default::default()
		}
	}

	/// An actor with no identity, e.g. housekeeping jobs.
	pub fn system() -> Self {
		Self::default()
	}

	pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
		self.ip_address = Some(ip.into());
		self
	}

	pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
		self.user_agent = Some(ua.into());
		self
	}
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
	pub id: Uuid,
	pub flag_key: String,
	pub action: AuditAction,
	pub actor: Actor,
	/// State before the mutation. `Null` for creations.
	pub before: serde_json::Value,
	/// State after the mutation. `Null` for deletions.
	pub after: serde_json::Value,
	pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
	pub fn builder(flag_key: impl Into<String>, action: AuditAction) -> AuditLogBuilder {
		AuditLogBuilder::new(flag_key, action)
	}
}

pub struct AuditLogBuilder {
	flag_key: String,
	action: AuditAction,
	actor: Actor,
	before: serde_json::Value,
	after: serde_json::Value,
	timestamp: Option<DateTime<Utc>>,
}

impl AuditLogBuilder {
	pub fn new(flag_key: impl Into<String>, action: AuditAction) -> Self {
		Self {
			flag_key: flag_key.into(),
			action,
			actor: Actor::default(),
			before: serde_json::Value::Null,
			after: serde_json::Value::Null,
			timestamp: None,
		}
	}

	pub fn actor(mut self, actor: Actor) -> Self {
		self.actor = actor;
		self
	}

	/// Snapshot of the record before the mutation.
	pub fn before<T: Serialize>(mut self, before: &T) -> Result<Self, serde_json::Error> {
		self.before = serde_json::to_value(before)?;
		Ok(self)
	}

	/// Snapshot of the record after the mutation.
	pub fn after<T: Serialize>(mut self, after: &T) -> Result<Self, serde_json::Error> {
		self.after = serde_json::to_value(after)?;
		Ok(self)
	}

	/// Defaults to the time of `build`.
	pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}

	pub fn build(self) -> AuditLogEntry {
		AuditLogEntry {
			id: Uuid::new_v4(),
			flag_key: self.flag_key,
			action: self.action,
			actor: self.actor,
			before: self.before,
			after: self.after,
			timestamp: self.timestamp.unwrap_or_else(Utc::now),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn action_round_trips_through_str() {
		for action in AuditAction::ALL {
			assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
		}
		assert!("delete".parse::<AuditAction>().is_err());
	}

	#[test]
	fn action_serializes_snake_case() {
		let json = serde_json::to_value(AuditAction::OverrideCreate).unwrap();
		assert_eq!(json, serde_json::json!("override_create"));
	}

	#[test]
	fn builder_defaults_snapshots_to_null() {
		let entry = AuditLogEntry::builder("new_checkout", AuditAction::Create).build();
		assert!(entry.before.is_null());
		assert!(entry.after.is_null());
		assert_eq!(entry.actor, Actor::system());
	}

	#[test]
	fn builder_captures_actor_and_snapshots() {
		let user = UserId::new();
		let actor = Actor::user(user)
			.with_ip_address("10.0.0.1")
			.with_user_agent("tally-flags/0.1");
		let entry = AuditLogEntry::builder("new_checkout", AuditAction::Enable)
			.actor(actor.clone())
			.before(&serde_json::json!({"status": "disabled"}))
			.unwrap()
			.after(&serde_json::json!({"status": "enabled"}))
			.unwrap()
			.build();

		assert_eq!(entry.actor, actor);
		assert_eq!(entry.before["status"], "disabled");
		assert_eq!(entry.after["status"], "enabled");
	}
}
