// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tally_server_audit::{Actor, SqliteAuditLog};
use tally_server_config::FlagsConfig;
use tally_server_flags::{
	run_migrations, EvaluationService, FlagAdminService, FlagCache, FlagKind, FlagValue, NewFlag,
	OverrideStore, SqliteFlagStore, SqliteOverrideStore, TargetingRule, UserId,
};

pub struct Engine {
	pub admin: FlagAdminService,
	pub evaluator: EvaluationService,
}

/// Admin and evaluation services sharing one in-memory database and cache.
pub async fn engine(config: FlagsConfig) -> Engine {
	engine_with_overrides(config, |store| Arc::new(store) as Arc<dyn OverrideStore>).await
}

/// Like [`engine`], with the override store wrapped by `wrap`.
pub async fn engine_with_overrides<W>(config: FlagsConfig, wrap: W) -> Engine
where
	W: FnOnce(SqliteOverrideStore) -> Arc<dyn OverrideStore>,
{
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.expect("Failed to create test pool");
	run_migrations(&pool).await.expect("Failed to run migrations");

	let flags = Arc::new(SqliteFlagStore::new(pool.clone()));
	let overrides = wrap(SqliteOverrideStore::new(pool.clone()));
	let audit = Arc::new(SqliteAuditLog::new(pool));
	let cache = Arc::new(FlagCache::new(
		config.cache_max_capacity,
		Duration::from_secs(config.cache_ttl_secs),
	));

	Engine {
		admin: FlagAdminService::new(
			flags.clone(),
			overrides.clone(),
			audit,
			cache.clone(),
			config.clone(),
		),
		evaluator: EvaluationService::new(flags, overrides, cache, config),
	}
}

pub fn admin_actor() -> Actor {
	Actor::user(UserId::new())
		.with_ip_address("192.0.2.10")
		.with_user_agent("tally-tests")
}

pub fn boolean_flag(key: &str, rules: Vec<TargetingRule>) -> NewFlag {
	NewFlag {
		key: key.to_string(),
		name: key.replace(&['_', '.'][..], " "),
		description: None,
		kind: FlagKind::Boolean,
		default_value: FlagValue::Boolean(false),
		variants: Vec::new(),
		rules,
		tags: Vec::new(),
	}
}

/// `new_checkout`: a 50% percentage rollout, enabled, at version 2.
pub async fn enabled_new_checkout(engine: &Engine) {
	let new_flag = NewFlag {
		key: "new_checkout".to_string(),
		name: "New checkout".to_string(),
		description: Some("Redesigned checkout flow".to_string()),
		kind: FlagKind::Percentage,
		default_value: FlagValue::Boolean(false),
		variants: Vec::new(),
		rules: vec![TargetingRule::everyone(50, FlagValue::Boolean(true))],
		tags: vec!["checkout".to_string()],
	};
	let actor = admin_actor();
	engine.admin.create_flag(new_flag, &actor).await.unwrap();
	engine.admin.enable("new_checkout", 1, &actor).await.unwrap();
}
