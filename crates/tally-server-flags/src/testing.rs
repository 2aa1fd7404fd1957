// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared fixtures for unit tests.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tally_flags_core::{
	Condition, FeatureFlag, FlagKind, FlagValue, NewFlag, SetOperator, TargetingRule,
};

use crate::schema::run_migrations;

/// A single-connection in-memory database with every table created.
pub(crate) async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.expect("Failed to create test pool");
	run_migrations(&pool)
		.await
		.expect("Failed to run migrations");
	pool
}

/// Percentage flag: enterprise plans always on, everyone else at 50%.
pub(crate) fn sample_new_flag(key: &str) -> NewFlag {
	NewFlag {
		key: key.to_string(),
		name: format!("Flag {key}"),
		description: Some("Fixture".to_string()),
		kind: FlagKind::Percentage,
		default_value: FlagValue::Boolean(false),
		variants: Vec::new(),
		rules: vec![
			TargetingRule {
				description: Some("enterprise plans".to_string()),
				conditions: vec![Condition::Set {
					attribute: "plan".to_string(),
					operator: SetOperator::In,
					values: vec!["enterprise".to_string()],
				}],
				rollout_percentage: 100,
				value: FlagValue::Boolean(true),
			},
			TargetingRule::everyone(50, FlagValue::Boolean(true)),
		],
		tags: vec!["checkout".to_string()],
	}
}

/// Disabled, version 1.
pub(crate) fn sample_flag(key: &str) -> FeatureFlag {
	sample_new_flag(key)
		.into_flag(None, Utc::now())
		.expect("fixture flag is valid")
}
