// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Administrative operations on flags and overrides.
//!
//! Every mutation takes the version the caller last read, is validated in
//! full before anything is written, and commits together with its audit
//! entry. The snapshot cache is refreshed after the commit.

use std::sync::Arc;

use chrono::Utc;
use tally_flags_core::{
	FeatureFlag, FlagPatch, FlagStatus, FlagsError, NewFlag, NewOverride, Override, OverrideId, Page,
};
use tally_server_audit::{Actor, AuditAction, AuditFilter, AuditLog, AuditLogEntry, AuditPage};
use tally_server_config::FlagsConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::FlagCache;
use crate::error::{ErrorKind, FlagsServerError, Result};
use crate::repository::{FlagFilter, FlagPage, FlagStore, OverrideStore};

pub struct FlagAdminService {
	flags: Arc<dyn FlagStore>,
	overrides: Arc<dyn OverrideStore>,
	audit: Arc<dyn AuditLog>,
	cache: Arc<FlagCache>,
	config: FlagsConfig,
}

impl FlagAdminService {
	pub fn new(
		flags: Arc<dyn FlagStore>,
		overrides: Arc<dyn OverrideStore>,
		audit: Arc<dyn AuditLog>,
		cache: Arc<FlagCache>,
		config: FlagsConfig,
	) -> Self {
		Self {
			flags,
			overrides,
			audit,
			cache,
			config,
		}
	}

	#[instrument(skip(self, new_flag, actor), fields(flag_key = %new_flag.key))]
	pub async fn create_flag(&self, new_flag: NewFlag, actor: &Actor) -> Result<FeatureFlag> {
		let flag = new_flag.into_flag(actor.user_id, Utc::now())?;
		let audit = AuditLogEntry::builder(&flag.key, AuditAction::Create)
			.actor(actor.clone())
			.after(&flag)?
			.build();

		self.flags.create(&flag, &audit).await?;
		self.cache.invalidate_flag(&flag.key).await;

		info!(kind = %flag.kind, "flag created");
		Ok(flag)
	}

	/// Applies `patch` to the flag at `expected_version`.
	#[instrument(skip(self, patch, actor), fields(flag_key = %key))]
	pub async fn update_flag(
		&self,
		key: &str,
		expected_version: i64,
		patch: FlagPatch,
		actor: &Actor,
	) -> Result<FeatureFlag> {
		let current = self.current(key, expected_version).await?;
		if patch.is_empty() {
			return Err(FlagsError::EmptyUpdate.into());
		}

		let next = patch.apply(&current, actor.user_id, Utc::now())?;
		let audit = AuditLogEntry::builder(key, AuditAction::Update)
			.actor(actor.clone())
			.before(&current)?
			.after(&next)?
			.build();

		self
			.flags
			.update(expected_version, &next, &audit)
			.await
			.inspect_err(|e| log_write_failure(key, e))?;
		self.cache.invalidate_flag(key).await;

		info!(version = next.version, "flag updated");
		Ok(next)
	}

	pub async fn enable(&self, key: &str, expected_version: i64, actor: &Actor) -> Result<FeatureFlag> {
		self
			.set_status(key, expected_version, FlagStatus::Enabled, actor)
			.await
	}

	pub async fn disable(
		&self,
		key: &str,
		expected_version: i64,
		actor: &Actor,
	) -> Result<FeatureFlag> {
		self
			.set_status(key, expected_version, FlagStatus::Disabled, actor)
			.await
	}

	/// Archival is terminal: the flag can no longer be evaluated or changed.
	pub async fn archive(
		&self,
		key: &str,
		expected_version: i64,
		actor: &Actor,
	) -> Result<FeatureFlag> {
		let flag = self
			.set_status(key, expected_version, FlagStatus::Archived, actor)
			.await?;
		self.cache.invalidate_overrides(key).await;
		Ok(flag)
	}

	#[instrument(skip(self, actor), fields(flag_key = %key))]
	async fn set_status(
		&self,
		key: &str,
		expected_version: i64,
		status: FlagStatus,
		actor: &Actor,
	) -> Result<FeatureFlag> {
		let current = self.current(key, expected_version).await?;
		let action = match status {
			FlagStatus::Enabled => AuditAction::Enable,
			FlagStatus::Disabled => AuditAction::Disable,
			FlagStatus::Archived => AuditAction::Archive,
		};

		if current.status == status {
			if self.config.record_redundant_toggles {
				let audit = AuditLogEntry::builder(key, action)
					.actor(actor.clone())
					.before(&current)?
					.after(&current)?
					.build();
				self
					.flags
					.record_unchanged(key, expected_version, &audit)
					.await
					.inspect_err(|e| log_write_failure(key, e))?;
			}
			debug!("flag already in requested status");
			return Ok(current);
		}

		if !current.status.can_transition_to(status) {
			return Err(FlagsServerError::InvalidState(format!(
				"flag '{key}' cannot move from {} to {status}",
				current.status
			)));
		}

		let next = current.with_status(status, actor.user_id, Utc::now());
		let audit = AuditLogEntry::builder(key, action)
			.actor(actor.clone())
			.before(&current)?
			.after(&next)?
			.build();

		self
			.flags
			.set_status(expected_version, &next, &audit)
			.await
			.inspect_err(|e| log_write_failure(key, e))?;
		self.cache.invalidate_flag(key).await;

		info!(version = next.version, "flag status changed");
		Ok(next)
	}

	pub async fn get_flag(&self, key: &str) -> Result<FeatureFlag> {
		self.flags.get(key).await
	}

	pub async fn list_flags(&self, filter: &FlagFilter, page: Page) -> Result<FlagPage> {
		self.flags.list(filter, page.clamped()).await
	}

	#[instrument(skip(self, new_override, actor), fields(flag_key = %key, target = %new_override.target))]
	pub async fn create_override(
		&self,
		key: &str,
		new_override: NewOverride,
		actor: &Actor,
	) -> Result<Override> {
		let flag = self.flags.get(key).await?;
		if flag.is_archived() {
			return Err(FlagsServerError::InvalidState(format!(
				"flag '{key}' is archived"
			)));
		}

		let created = new_override.into_override(&flag, actor.user_id, Utc::now())?;
		let audit = AuditLogEntry::builder(key, AuditAction::OverrideCreate)
			.actor(actor.clone())
			.after(&created)?
			.build();

		self.overrides.create(&created, &audit).await?;
		self.cache.invalidate_overrides(key).await;

		info!(override_id = %created.id, "override created");
		Ok(created)
	}

	#[instrument(skip(self, actor), fields(override_id = %id))]
	pub async fn delete_override(&self, id: OverrideId, actor: &Actor) -> Result<()> {
		let existing = self.overrides.get(id).await?;
		let audit = AuditLogEntry::builder(&existing.flag_key, AuditAction::OverrideDelete)
			.actor(actor.clone())
			.before(&existing)?
			.build();

		self.overrides.delete(id, &audit).await?;
		self.cache.invalidate_overrides(&existing.flag_key).await;

		info!(flag_key = %existing.flag_key, "override deleted");
		Ok(())
	}

	pub async fn list_overrides(&self, key: &str, page: Page) -> Result<Vec<Override>> {
		self.flags.get(key).await?;
		self.overrides.list(key, page.clamped()).await
	}

	/// Drops overrides that have already expired. They were inert, so this is
	/// not audited.
	#[instrument(skip(self))]
	pub async fn cleanup_expired_overrides(&self) -> Result<u64> {
		let removed = self.overrides.delete_expired(Utc::now()).await?;
		if removed > 0 {
			self.cache.invalidate_all_overrides();
			info!(removed, "expired overrides removed");
		}
		Ok(removed)
	}

	pub async fn audit_log(
		&self,
		key: &str,
		filter: &AuditFilter,
		page: Page,
	) -> Result<AuditPage> {
		self.flags.get(key).await?;
		Ok(self.audit.list(key, filter, page.clamped()).await?)
	}

	/// Fresh read for a mutation. Rejects archived flags and stale versions
	/// before any validation work.
	async fn current(&self, key: &str, expected_version: i64) -> Result<FeatureFlag> {
		let current = self.flags.get(key).await?;
		if current.is_archived() {
			return Err(FlagsServerError::InvalidState(format!(
				"flag '{key}' is archived"
			)));
		}
		if current.version != expected_version {
			debug!(flag_key = %key, expected_version, version = current.version, "stale version");
			return Err(FlagsServerError::Conflict(format!(
				"flag '{key}' is at version {}, not {expected_version}",
				current.version
			)));
		}
		Ok(current)
	}
}

fn log_write_failure(key: &str, err: &FlagsServerError) {
	if err.is_conflict() {
		warn!(flag_key = %key, error = %err, "concurrent modification rejected");
	} else if err.kind() == ErrorKind::Internal {
		error!(flag_key = %key, error = %err, "flag write failed");
	}
}
