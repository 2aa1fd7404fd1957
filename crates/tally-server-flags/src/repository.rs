// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use tally_flags_core::{
	FeatureFlag, FlagKind, FlagStatus, FlagValue, Override, OverrideId, OverrideTarget, Page,
	TargetingRule, UserId,
};
use tally_server_audit::{insert_entry, AuditLogEntry};

use crate::error::{FlagsServerError, Result};

/// Narrows a flag listing. Set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagFilter {
	pub status: Option<FlagStatus>,
	pub kind: Option<FlagKind>,
	/// The flag must carry every listed tag.
	#[serde(default)]
	pub tags: Vec<String>,
	/// Case-insensitive substring of key or name.
	pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagPage {
	pub items: Vec<FeatureFlag>,
	pub total: i64,
	pub offset: u32,
	pub limit: u32,
}

/// Persistence for flag definitions. Every mutation is checked against the
/// version the caller read and commits together with its audit entry.
#[async_trait]
pub trait FlagStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<FeatureFlag>;

	async fn list(&self, filter: &FlagFilter, page: Page) -> Result<FlagPage>;

	/// Fails with `Conflict` when the key already exists.
	async fn create(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<()>;

	/// Replaces the definition of an existing flag.
	async fn update(
		&self,
		expected_version: i64,
		flag: &FeatureFlag,
		audit: &AuditLogEntry,
	) -> Result<()>;

	/// Writes a lifecycle transition. Archived flags never leave `Archived`.
	async fn set_status(
		&self,
		expected_version: i64,
		flag: &FeatureFlag,
		audit: &AuditLogEntry,
	) -> Result<()>;

	/// Records an audit entry for a mutation that changed nothing, after
	/// checking `expected_version` like any other mutation.
	async fn record_unchanged(
		&self,
		key: &str,
		expected_version: i64,
		audit: &AuditLogEntry,
	) -> Result<()>;
}

/// Persistence for per-user and per-tenant overrides.
#[async_trait]
pub trait OverrideStore: Send + Sync {
	/// Newest first.
	async fn list(&self, flag_key: &str, page: Page) -> Result<Vec<Override>>;

	async fn get(&self, id: OverrideId) -> Result<Override>;

	/// The owning flag must exist and not be archived.
	async fn create(&self, override_: &Override, audit: &AuditLogEntry) -> Result<()>;

	async fn delete(&self, id: OverrideId, audit: &AuditLogEntry) -> Result<()>;

	/// The newest unexpired override for one target.
	async fn find_active(
		&self,
		flag_key: &str,
		target: OverrideTarget,
		target_id: &str,
		now: DateTime<Utc>,
	) -> Result<Option<Override>>;

	/// Every unexpired override on a flag, newest first.
	async fn list_active(&self, flag_key: &str, now: DateTime<Utc>) -> Result<Vec<Override>>;

	/// Removes overrides that expired before `now`. Returns how many.
	async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|_| FlagsServerError::Internal(format!("Invalid {column}")))
}

fn decode_user_id(raw: Option<String>) -> Result<Option<UserId>> {
	raw.map(|s| {
		s.parse()
			.map_err(|_| FlagsServerError::Internal("Invalid user ID".to_string()))
	})
	.transpose()
}

fn escape_like(input: &str) -> String {
	let mut escaped = String::with_capacity(input.len() + 2);
	escaped.push('%');
	for c in input.chars() {
		if matches!(c, '%' | '_' | '\\') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped.push('%');
	escaped
}

pub struct SqliteFlagStore {
	pool: SqlitePool,
}

impl SqliteFlagStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Works out why a version-checked write touched no rows.
	async fn explain_missed_write(
		conn: &mut SqliteConnection,
		key: &str,
		expected_version: i64,
	) -> Result<FlagsServerError> {
		let row = sqlx::query("SELECT version, status FROM feature_flags WHERE key = ?")
			.bind(key)
			.fetch_optional(&mut *conn)
			.await?;

		let Some(row) = row else {
			return Ok(FlagsServerError::flag_not_found(key));
		};
		let version: i64 = row.get("version");
		let status: String = row.get("status");

		if status == FlagStatus::Archived.as_str() {
			return Ok(FlagsServerError::InvalidState(format!(
				"flag '{key}' is archived"
			)));
		}
		if version != expected_version {
			tracing::debug!(flag_key = %key, expected_version, version, "version conflict");
			return Ok(FlagsServerError::Conflict(format!(
				"flag '{key}' is at version {version}, not {expected_version}"
			)));
		}
		Ok(FlagsServerError::Internal(format!(
			"write to flag '{key}' affected no rows"
		)))
	}

	async fn write_versioned(
		&self,
		expected_version: i64,
		flag: &FeatureFlag,
		audit: &AuditLogEntry,
	) -> Result<()> {
		if flag.version != expected_version + 1 {
			return Err(FlagsServerError::Internal(format!(
				"flag '{}' must be written at version {}, got {}",
				flag.key,
				expected_version + 1,
				flag.version
			)));
		}

		let variants_json = serde_json::to_string(&flag.variants)?;
		let rules_json = serde_json::to_string(&flag.rules)?;
		let tags_json = serde_json::to_string(&flag.tags)?;
		let default_json = serde_json::to_string(&flag.default_value)?;

		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			r#"
			UPDATE feature_flags
			SET name = ?, description = ?, default_value = ?, variants = ?, rules = ?,
				tags = ?, status = ?, version = ?, updated_by = ?, updated_at = ?
			WHERE key = ? AND version = ? AND status != 'archived'
			"#,
		)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(default_json)
		.bind(variants_json)
		.bind(rules_json)
		.bind(tags_json)
		.bind(flag.status.as_str())
		.bind(flag.version)
		.bind(flag.updated_by.map(|id| id.to_string()))
		.bind(encode_timestamp(&flag.updated_at))
		.bind(&flag.key)
		.bind(expected_version)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			let err = Self::explain_missed_write(&mut *tx, &flag.key, expected_version).await?;
			tx.rollback().await?;
			return Err(err);
		}

		insert_entry(&mut *tx, audit).await?;
		tx.commit().await?;

		Ok(())
	}
}

const FLAG_COLUMNS: &str = "key, name, description, kind, default_value, variants, rules, tags, \
	 status, version, created_by, updated_by, created_at, updated_at";

#[async_trait]
impl FlagStore for SqliteFlagStore {
	#[instrument(skip(self), fields(flag_key = %key))]
	async fn get(&self, key: &str) -> Result<FeatureFlag> {
		let sql = format!("SELECT {FLAG_COLUMNS} FROM feature_flags WHERE key = ?");
		let row = sqlx::query_as::<_, FlagRow>(&sql)
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => row.try_into(),
			None => Err(FlagsServerError::flag_not_found(key)),
		}
	}

	#[instrument(skip(self, filter))]
	async fn list(&self, filter: &FlagFilter, page: Page) -> Result<FlagPage> {
		let page = page.clamped();

		let mut conditions = vec!["1=1".to_string()];
		let mut binds: Vec<String> = Vec::new();

		if let Some(status) = filter.status {
			conditions.push("status = ?".to_string());
			binds.push(status.as_str().to_string());
		}
		if let Some(kind) = filter.kind {
			conditions.push("kind = ?".to_string());
			binds.push(kind.as_str().to_string());
		}
		for tag in tally_flags_core::normalize_tags(&filter.tags) {
			conditions.push(
				"EXISTS (SELECT 1 FROM json_each(feature_flags.tags) WHERE json_each.value = ?)"
					.to_string(),
			);
			binds.push(tag);
		}
		if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
			conditions
				.push("(LOWER(key) LIKE ? ESCAPE '\\' OR LOWER(name) LIKE ? ESCAPE '\\')".to_string());
			let pattern = escape_like(&search.to_lowercase());
			binds.push(pattern.clone());
			binds.push(pattern);
		}

		let where_clause = conditions.join(" AND ");

		let count_sql = format!(
			"SELECT COUNT(*) as cnt FROM feature_flags WHERE {}",
			where_clause
		);
		let mut count_query = sqlx::query(&count_sql);
		for value in &binds {
			count_query = count_query.bind(value);
		}
		let total: i64 = count_query.fetch_one(&self.pool).await?.get("cnt");

		let data_sql = format!(
			"SELECT {FLAG_COLUMNS} FROM feature_flags WHERE {} ORDER BY key LIMIT ? OFFSET ?",
			where_clause
		);
		let mut data_query = sqlx::query_as::<_, FlagRow>(&data_sql);
		for value in &binds {
			data_query = data_query.bind(value);
		}
		let rows = data_query
			.bind(i64::from(page.limit))
			.bind(i64::from(page.offset))
			.fetch_all(&self.pool)
			.await?;

		let items = rows
			.into_iter()
			.map(FeatureFlag::try_from)
			.collect::<Result<Vec<_>>>()?;

		Ok(FlagPage {
			items,
			total,
			offset: page.offset,
			limit: page.limit,
		})
	}

	#[instrument(skip(self, flag, audit), fields(flag_key = %flag.key))]
	async fn create(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<()> {
		let variants_json = serde_json::to_string(&flag.variants)?;
		let rules_json = serde_json::to_string(&flag.rules)?;
		let tags_json = serde_json::to_string(&flag.tags)?;
		let default_json = serde_json::to_string(&flag.default_value)?;

		let mut tx = self.pool.begin().await?;

		let inserted = sqlx::query(
			r#"
			INSERT INTO feature_flags (key, name, description, kind, default_value, variants,
									   rules, tags, status, version, created_by, updated_by,
									   created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&flag.key)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.kind.as_str())
		.bind(default_json)
		.bind(variants_json)
		.bind(rules_json)
		.bind(tags_json)
		.bind(flag.status.as_str())
		.bind(flag.version)
		.bind(flag.created_by.map(|id| id.to_string()))
		.bind(flag.updated_by.map(|id| id.to_string()))
		.bind(encode_timestamp(&flag.created_at))
		.bind(encode_timestamp(&flag.updated_at))
		.execute(&mut *tx)
		.await;

		match inserted {
			Ok(_) => {}
			Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
				tx.rollback().await?;
				return Err(FlagsServerError::Conflict(format!(
					"flag '{}' already exists",
					flag.key
				)));
			}
			Err(e) => return Err(e.into()),
		}

		insert_entry(&mut *tx, audit).await?;
		tx.commit().await?;

		Ok(())
	}

	#[instrument(skip(self, flag, audit), fields(flag_key = %flag.key))]
	async fn update(
		&self,
		expected_version: i64,
		flag: &FeatureFlag,
		audit: &AuditLogEntry,
	) -> Result<()> {
		self.write_versioned(expected_version, flag, audit).await
	}

	#[instrument(skip(self, flag, audit), fields(flag_key = %flag.key, status = %flag.status))]
	async fn set_status(
		&self,
		expected_version: i64,
		flag: &FeatureFlag,
		audit: &AuditLogEntry,
	) -> Result<()> {
		self.write_versioned(expected_version, flag, audit).await
	}

	#[instrument(skip(self, audit), fields(flag_key = %key))]
	async fn record_unchanged(
		&self,
		key: &str,
		expected_version: i64,
		audit: &AuditLogEntry,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let current: Option<i64> = sqlx::query_scalar(
			"SELECT version FROM feature_flags WHERE key = ? AND status != 'archived'",
		)
		.bind(key)
		.fetch_optional(&mut *tx)
		.await?;

		if current != Some(expected_version) {
			let err = Self::explain_missed_write(&mut *tx, key, expected_version).await?;
			tx.rollback().await?;
			return Err(err);
		}

		insert_entry(&mut *tx, audit).await?;
		tx.commit().await?;
		Ok(())
	}
}

pub struct SqliteOverrideStore {
	pool: SqlitePool,
}

impl SqliteOverrideStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const OVERRIDE_COLUMNS: &str =
	"id, flag_key, target, target_id, value, reason, expires_at, created_by, created_at";

#[async_trait]
impl OverrideStore for SqliteOverrideStore {
	#[instrument(skip(self), fields(flag_key = %flag_key))]
	async fn list(&self, flag_key: &str, page: Page) -> Result<Vec<Override>> {
		let page = page.clamped();
		let sql = format!(
			"SELECT {OVERRIDE_COLUMNS} FROM flag_overrides WHERE flag_key = ? \
			 ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
		);
		let rows = sqlx::query_as::<_, OverrideRow>(&sql)
			.bind(flag_key)
			.bind(i64::from(page.limit))
			.bind(i64::from(page.offset))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(Override::try_from).collect()
	}

	#[instrument(skip(self), fields(override_id = %id))]
	async fn get(&self, id: OverrideId) -> Result<Override> {
		let sql = format!("SELECT {OVERRIDE_COLUMNS} FROM flag_overrides WHERE id = ?");
		let row = sqlx::query_as::<_, OverrideRow>(&sql)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => row.try_into(),
			None => Err(FlagsServerError::override_not_found(id)),
		}
	}

	#[instrument(skip(self, override_, audit), fields(flag_key = %override_.flag_key, target = %override_.target))]
	async fn create(&self, override_: &Override, audit: &AuditLogEntry) -> Result<()> {
		let value_json = serde_json::to_string(&override_.value)?;

		let mut tx = self.pool.begin().await?;

		let status: Option<String> =
			sqlx::query_scalar("SELECT status FROM feature_flags WHERE key = ?")
				.bind(&override_.flag_key)
				.fetch_optional(&mut *tx)
				.await?;
		match status.as_deref() {
			None => {
				tx.rollback().await?;
				return Err(FlagsServerError::flag_not_found(&override_.flag_key));
			}
			Some(s) if s == FlagStatus::Archived.as_str() => {
				tx.rollback().await?;
				return Err(FlagsServerError::InvalidState(format!(
					"flag '{}' is archived",
					override_.flag_key
				)));
			}
			Some(_) => {}
		}

		sqlx::query(
			r#"
			INSERT INTO flag_overrides (id, flag_key, target, target_id, value, reason,
										expires_at, created_by, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(override_.id.to_string())
		.bind(&override_.flag_key)
		.bind(override_.target.as_str())
		.bind(&override_.target_id)
		.bind(value_json)
		.bind(&override_.reason)
		.bind(override_.expires_at.as_ref().map(encode_timestamp))
		.bind(override_.created_by.map(|id| id.to_string()))
		.bind(encode_timestamp(&override_.created_at))
		.execute(&mut *tx)
		.await?;

		insert_entry(&mut *tx, audit).await?;
		tx.commit().await?;

		Ok(())
	}

	#[instrument(skip(self, audit), fields(override_id = %id))]
	async fn delete(&self, id: OverrideId, audit: &AuditLogEntry) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query("DELETE FROM flag_overrides WHERE id = ?")
			.bind(id.to_string())
			.execute(&mut *tx)
			.await?;

		if result.rows_affected() == 0 {
			tx.rollback().await?;
			return Err(FlagsServerError::override_not_found(id));
		}

		insert_entry(&mut *tx, audit).await?;
		tx.commit().await?;

		Ok(())
	}

	#[instrument(skip(self), fields(flag_key = %flag_key, target = %target))]
	async fn find_active(
		&self,
		flag_key: &str,
		target: OverrideTarget,
		target_id: &str,
		now: DateTime<Utc>,
	) -> Result<Option<Override>> {
		let sql = format!(
			"SELECT {OVERRIDE_COLUMNS} FROM flag_overrides \
			 WHERE flag_key = ? AND target = ? AND target_id = ? \
			 AND (expires_at IS NULL OR expires_at >= ?) \
			 ORDER BY created_at DESC, rowid DESC LIMIT 1"
		);
		let row = sqlx::query_as::<_, OverrideRow>(&sql)
			.bind(flag_key)
			.bind(target.as_str())
			.bind(target_id)
			.bind(encode_timestamp(&now))
			.fetch_optional(&self.pool)
			.await?;

		row.map(Override::try_from).transpose()
	}

	#[instrument(skip(self), fields(flag_key = %flag_key))]
	async fn list_active(&self, flag_key: &str, now: DateTime<Utc>) -> Result<Vec<Override>> {
		let sql = format!(
			"SELECT {OVERRIDE_COLUMNS} FROM flag_overrides \
			 WHERE flag_key = ? AND (expires_at IS NULL OR expires_at >= ?) \
			 ORDER BY created_at DESC, rowid DESC"
		);
		let rows = sqlx::query_as::<_, OverrideRow>(&sql)
			.bind(flag_key)
			.bind(encode_timestamp(&now))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(Override::try_from).collect()
	}

	#[instrument(skip(self))]
	async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		let result =
			sqlx::query("DELETE FROM flag_overrides WHERE expires_at IS NOT NULL AND expires_at < ?")
				.bind(encode_timestamp(&now))
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}
}

#[derive(sqlx::FromRow)]
struct FlagRow {
	key: String,
	name: String,
	description: Option<String>,
	kind: String,
	default_value: String,
	variants: String,
	rules: String,
	tags: String,
	status: String,
	version: i64,
	created_by: Option<String>,
	updated_by: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<FlagRow> for FeatureFlag {
	type Error = FlagsServerError;

	fn try_from(row: FlagRow) -> Result<Self> {
		let rules: Vec<TargetingRule> = serde_json::from_str(&row.rules)?;
		let default_value: FlagValue = serde_json::from_str(&row.default_value)?;

		Ok(FeatureFlag {
			kind: row.kind.parse()?,
			status: row.status.parse()?,
			default_value,
			variants: serde_json::from_str(&row.variants)?,
			rules,
			tags: serde_json::from_str(&row.tags)?,
			version: row.version,
			created_by: decode_user_id(row.created_by)?,
			updated_by: decode_user_id(row.updated_by)?,
			created_at: decode_timestamp(&row.created_at, "created_at")?,
			updated_at: decode_timestamp(&row.updated_at, "updated_at")?,
			key: row.key,
			name: row.name,
			description: row.description,
		})
	}
}

#[derive(sqlx::FromRow)]
struct OverrideRow {
	id: String,
	flag_key: String,
	target: String,
	target_id: String,
	value: String,
	reason: String,
	expires_at: Option<String>,
	created_by: Option<String>,
	created_at: String,
}

impl TryFrom<OverrideRow> for Override {
	type Error = FlagsServerError;

	fn try_from(row: OverrideRow) -> Result<Self> {
		Ok(Override {
			id: row
				.id
				.parse()
				.map_err(|_| FlagsServerError::Internal("Invalid override ID".to_string()))?,
			flag_key: row.flag_key,
			target: row.target.parse()?,
			target_id: row.target_id,
			value: serde_json::from_str(&row.value)?,
			reason: row.reason,
			expires_at: row
				.expires_at
				.map(|s| decode_timestamp(&s, "expires_at"))
				.transpose()?,
			created_by: decode_user_id(row.created_by)?,
			created_at: decode_timestamp(&row.created_at, "created_at")?,
		})
	}
}
