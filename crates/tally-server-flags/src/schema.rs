// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::SqlitePool;
use tally_server_audit::AUDIT_SCHEMA;

use crate::error::Result;

const FLAGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS feature_flags (
	key TEXT PRIMARY KEY,
	name TEXT NOT NULL,
	description TEXT,
	kind TEXT NOT NULL,
	default_value TEXT NOT NULL,
	variants TEXT NOT NULL DEFAULT '[]',
	rules TEXT NOT NULL DEFAULT '[]',
	tags TEXT NOT NULL DEFAULT '[]',
	status TEXT NOT NULL,
	version INTEGER NOT NULL,
	created_by TEXT,
	updated_by TEXT,
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feature_flags_status ON feature_flags(status);

CREATE TABLE IF NOT EXISTS flag_overrides (
	id TEXT PRIMARY KEY,
	flag_key TEXT NOT NULL REFERENCES feature_flags(key),
	target TEXT NOT NULL,
	target_id TEXT NOT NULL,
	value TEXT NOT NULL,
	reason TEXT NOT NULL DEFAULT '',
	expires_at TEXT,
	created_by TEXT,
	created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flag_overrides_lookup ON flag_overrides(flag_key, target, target_id);
CREATE INDEX IF NOT EXISTS idx_flag_overrides_expires_at ON flag_overrides(expires_at);
"#;

/// Creates every table the flag stores and the audit log need. Idempotent.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	sqlx::raw_sql(FLAGS_SCHEMA).execute(pool).await?;
	sqlx::raw_sql(AUDIT_SCHEMA).execute(pool).await?;
	tracing::debug!("flag schema ready");
	Ok(())
}
