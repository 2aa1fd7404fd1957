// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tally_flags_core::{Page, UserId};
use uuid::Uuid;

use crate::error::{AuditError, AuditResult};
use crate::event::{Actor, AuditAction, AuditLogEntry};

pub const AUDIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flag_audit_logs (
	id TEXT PRIMARY KEY,
	flag_key TEXT NOT NULL,
	action TEXT NOT NULL,
	actor_user_id TEXT,
	ip_address TEXT,
	user_agent TEXT,
	before_state TEXT,
	after_state TEXT,
	timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flag_audit_logs_flag_key ON flag_audit_logs(flag_key, timestamp);
"#;

/// Narrows an audit listing. Every field is optional; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
	pub action: Option<AuditAction>,
	pub actor_user_id: Option<UserId>,
	pub from: Option<DateTime<Utc>>,
	pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
	/// Newest first.
	pub entries: Vec<AuditLogEntry>,
	pub total: i64,
	pub offset: u32,
	pub limit: u32,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
	async fn append(&self, entry: &AuditLogEntry) -> AuditResult<()>;

	async fn list(&self, flag_key: &str, filter: &AuditFilter, page: Page)
		-> AuditResult<AuditPage>;
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Writes `entry` on `conn`. Pass a transaction's connection to make the
/// record commit or roll back together with the mutation it describes.
#[tracing::instrument(skip(conn, entry), fields(flag_key = %entry.flag_key, action = %entry.action))]
pub async fn insert_entry(conn: &mut SqliteConnection, entry: &AuditLogEntry) -> AuditResult<()> {
	let before = encode_snapshot(&entry.before)?;
	let after = encode_snapshot(&entry.after)?;

	sqlx::query(
		r#"
		INSERT INTO flag_audit_logs (
			id, flag_key, action, actor_user_id, ip_address, user_agent,
			before_state, after_state, timestamp
		) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(entry.id.to_string())
	.bind(&entry.flag_key)
	.bind(entry.action.as_str())
	.bind(entry.actor.user_id.as_ref().map(|u| u.to_string()))
	.bind(&entry.actor.ip_address)
	.bind(&entry.actor.user_agent)
	.bind(before)
	.bind(after)
	.bind(format_timestamp(&entry.timestamp))
	.execute(&mut *conn)
	.await?;

	Ok(())
}

fn encode_snapshot(value: &serde_json::Value) -> AuditResult<Option<String>> {
	if value.is_null() {
		return Ok(None);
	}
	Ok(Some(serde_json::to_string(value)?))
}

pub struct SqliteAuditLog {
	pool: SqlitePool,
}

impl SqliteAuditLog {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Creates the audit table if it does not exist.
	pub async fn ensure_schema(&self) -> AuditResult<()> {
		sqlx::raw_sql(AUDIT_SCHEMA).execute(&self.pool).await?;
		Ok(())
	}
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
	async fn append(&self, entry: &AuditLogEntry) -> AuditResult<()> {
		let mut conn = self.pool.acquire().await?;
		insert_entry(&mut *conn, entry).await
	}

	#[tracing::instrument(skip(self, filter))]
	async fn list(
		&self,
		flag_key: &str,
		filter: &AuditFilter,
		page: Page,
	) -> AuditResult<AuditPage> {
		let page = page.clamped();

		let mut conditions = vec!["flag_key = ?".to_string()];
		if filter.action.is_some() {
			conditions.push("action = ?".to_string());
		}
		if filter.actor_user_id.is_some() {
			conditions.push("actor_user_id = ?".to_string());
		}
		if filter.from.is_some() {
			conditions.push("timestamp >= ?".to_string());
		}
		if filter.to.is_some() {
			conditions.push("timestamp <= ?".to_string());
		}
		let where_clause = conditions.join(" AND ");

		let binds = filter_binds(flag_key, filter);

		let count_sql = format!(
			"SELECT COUNT(*) as cnt FROM flag_audit_logs WHERE {}",
			where_clause
		);
		let mut count_query = sqlx::query(&count_sql);
		for value in &binds {
			count_query = count_query.bind(value);
		}
		let total: i64 = count_query.fetch_one(&self.pool).await?.get("cnt");

		let data_sql = format!(
			"SELECT id, flag_key, action, actor_user_id, ip_address, user_agent, \
			 before_state, after_state, timestamp \
			 FROM flag_audit_logs WHERE {} ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?",
			where_clause
		);
		let mut data_query = sqlx::query(&data_sql);
		for value in &binds {
			data_query = data_query.bind(value);
		}
		let rows = data_query
			.bind(i64::from(page.limit))
			.bind(i64::from(page.offset))
			.fetch_all(&self.pool)
			.await?;

		let entries = rows
			.iter()
			.map(entry_from_row)
			.collect::<AuditResult<Vec<_>>>()?;

		Ok(AuditPage {
			entries,
			total,
			offset: page.offset,
			limit: page.limit,
		})
	}
}

fn filter_binds(flag_key: &str, filter: &AuditFilter) -> Vec<String> {
	let mut binds = vec![flag_key.to_string()];
	if let Some(action) = filter.action {
		binds.push(action.as_str().to_string());
	}
	if let Some(user_id) = filter.actor_user_id {
		binds.push(user_id.to_string());
	}
	if let Some(from) = filter.from {
		binds.push(format_timestamp(&from));
	}
	if let Some(to) = filter.to {
		binds.push(format_timestamp(&to));
	}
	binds
}

fn entry_from_row(row: &SqliteRow) -> AuditResult<AuditLogEntry> {
	let id_str: String = row.get("id");
	let corrupt = |reason: String| AuditError::CorruptRow {
		id: id_str.clone(),
		reason,
	};

	let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(e.to_string()))?;

	let action_str: String = row.get("action");
	let action = action_str.parse::<AuditAction>().map_err(corrupt)?;

	let actor_user_id: Option<String> = row.get("actor_user_id");
	let user_id = actor_user_id
		.map(|s| s.parse::<UserId>())
		.transpose()
		.map_err(|e| corrupt(e.to_string()))?;

	let ts_str: String = row.get("timestamp");
	let timestamp = DateTime::parse_from_rfc3339(&ts_str)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| corrupt(e.to_string()))?;

	let decode = |column: &str| -> AuditResult<serde_json::Value> {
		let raw: Option<String> = row.get(column);
		match raw {
			Some(s) => Ok(serde_json::from_str(&s)?),
			None => Ok(serde_json::Value::Null),
		}
	};

	Ok(AuditLogEntry {
		id,
		flag_key: row.get("flag_key"),
		action,
		actor: Actor {
			user_id,
			ip_address: row.get("ip_address"),
			user_agent: row.get("user_agent"),
		},
		before: decode("before_state")?,
		after: decode("after_state")?,
		timestamp,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn create_audit_test_pool() -> SqlitePool {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.expect("Failed to create test pool");
		SqliteAuditLog::new(pool.clone())
			.ensure_schema()
			.await
			.unwrap();
		pool
	}

	fn entry(flag_key: &str, action: AuditAction, at: DateTime<Utc>) -> AuditLogEntry {
		AuditLogEntry::builder(flag_key, action).timestamp(at).build()
	}

	#[tokio::test]
	async fn test_list_empty() {
		let log = SqliteAuditLog::new(create_audit_test_pool().await);
		let page = log
			.list("new_checkout", &AuditFilter::default(), Page::default())
			.await
			.unwrap();
		assert!(page.entries.is_empty());
		assert_eq!(page.total, 0);
	}

	#[tokio::test]
	async fn test_list_is_newest_first_and_scoped_to_flag() {
		let log = SqliteAuditLog::new(create_audit_test_pool().await);
		let t0 = Utc::now();
		log.append(&entry("new_checkout", AuditAction::Create, t0))
			.await
			.unwrap();
		log.append(&entry("new_checkout", AuditAction::Enable, t0 + Duration::seconds(1)))
			.await
			.unwrap();
		log.append(&entry("other_flag", AuditAction::Create, t0))
			.await
			.unwrap();

		let page = log
			.list("new_checkout", &AuditFilter::default(), Page::default())
			.await
			.unwrap();
		assert_eq!(page.total, 2);
		assert_eq!(page.entries[0].action, AuditAction::Enable);
		assert_eq!(page.entries[1].action, AuditAction::Create);
	}

	#[tokio::test]
	async fn test_same_timestamp_keeps_insertion_order_reversed() {
		let log = SqliteAuditLog::new(create_audit_test_pool().await);
		let t0 = Utc::now();
		log.append(&entry("f", AuditAction::Disable, t0)).await.unwrap();
		log.append(&entry("f", AuditAction::Disable, t0)).await.unwrap();
		log.append(&entry("f", AuditAction::Enable, t0)).await.unwrap();

		let page = log
			.list("f", &AuditFilter::default(), Page::default())
			.await
			.unwrap();
		assert_eq!(page.entries[0].action, AuditAction::Enable);
	}

	#[tokio::test]
	async fn test_list_with_filters() {
		let log = SqliteAuditLog::new(create_audit_test_pool().await);
		let user = UserId::new();
		let t0 = Utc::now();

		let by_user = AuditLogEntry::builder("f", AuditAction::Update)
			.actor(Actor::user(user).with_ip_address("10.0.0.1"))
			.before(&serde_json::json!({"version": 1}))
			.unwrap()
			.after(&serde_json::json!({"version": 2}))
			.unwrap()
			.timestamp(t0 + Duration::minutes(10))
			.build();
		log.append(&by_user).await.unwrap();
		log.append(&entry("f", AuditAction::Create, t0)).await.unwrap();

		let filter = AuditFilter {
			actor_user_id: Some(user),
			..Default::default()
		};
		let page = log.list("f", &filter, Page::default()).await.unwrap();
		assert_eq!(page.total, 1);
		let found = &page.entries[0];
		assert_eq!(found.id, by_user.id);
		assert_eq!(found.actor.ip_address.as_deref(), Some("10.0.0.1"));
		assert_eq!(found.before["version"], 1);
		assert_eq!(found.after["version"], 2);

		let filter = AuditFilter {
			action: Some(AuditAction::Create),
			..Default::default()
		};
		assert_eq!(log.list("f", &filter, Page::default()).await.unwrap().total, 1);

		let filter = AuditFilter {
			from: Some(t0 + Duration::minutes(1)),
			to: Some(t0 + Duration::minutes(20)),
			..Default::default()
		};
		let page = log.list("f", &filter, Page::default()).await.unwrap();
		assert_eq!(page.total, 1);
		assert_eq!(page.entries[0].action, AuditAction::Update);
	}

	#[tokio::test]
	async fn test_list_pagination() {
		let log = SqliteAuditLog::new(create_audit_test_pool().await);
		let t0 = Utc::now();
		for i in 0..5 {
			log.append(&entry("f", AuditAction::Update, t0 + Duration::seconds(i)))
				.await
				.unwrap();
		}

		let page = log
			.list("f", &AuditFilter::default(), Page::new(2, 2))
			.await
			.unwrap();
		assert_eq!(page.total, 5);
		assert_eq!(page.entries.len(), 2);
		assert_eq!(page.entries[0].timestamp.timestamp(), (t0 + Duration::seconds(2)).timestamp());
	}

	#[tokio::test]
	async fn test_insert_entry_rolls_back_with_transaction() {
		let pool = create_audit_test_pool().await;
		let log = SqliteAuditLog::new(pool.clone());

		let mut tx = pool.begin().await.unwrap();
		insert_entry(&mut *tx, &entry("f", AuditAction::Create, Utc::now()))
			.await
			.unwrap();
		tx.rollback().await.unwrap();

		let page = log
			.list("f", &AuditFilter::default(), Page::default())
			.await
			.unwrap();
		assert_eq!(page.total, 0);
	}
}
