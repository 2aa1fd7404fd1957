// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-side entry point: single, batch and client-config evaluation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tally_flags_core::{EvaluationContext, EvaluationResult, FeatureFlag, FlagStatus, Override, Page};
use tally_server_config::{FlagsConfig, UnknownKeyPolicy};
use tracing::{debug, error, instrument};

use crate::cache::FlagCache;
use crate::error::{ErrorKind, FlagsServerError, Result};
use crate::evaluation::evaluate_flag;
use crate::repository::{FlagFilter, FlagStore, OverrideStore};

/// A key that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
	pub flag_key: String,
	pub kind: ErrorKind,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
	/// Keyed by flag key; repeated keys collapse into one entry.
	pub results: HashMap<String, EvaluationResult>,
	/// Reported failures, in first-request order.
	pub errors: Vec<BatchError>,
}

pub struct EvaluationService {
	flags: Arc<dyn FlagStore>,
	overrides: Arc<dyn OverrideStore>,
	cache: Arc<FlagCache>,
	config: FlagsConfig,
}

impl EvaluationService {
	pub fn new(
		flags: Arc<dyn FlagStore>,
		overrides: Arc<dyn OverrideStore>,
		cache: Arc<FlagCache>,
		config: FlagsConfig,
	) -> Self {
		Self {
			flags,
			overrides,
			cache,
			config,
		}
	}

	/// Evaluates one flag. Unknown keys are `NotFound`; archived flags are
	/// `InvalidState`. A disabled flag is a successful `FlagDisabled` result.
	#[instrument(skip(self, context), fields(flag_key = %key))]
	pub async fn evaluate(&self, key: &str, context: &EvaluationContext) -> Result<EvaluationResult> {
		let flag = self.load_flag(key).await?;
		if flag.is_archived() {
			return Err(FlagsServerError::InvalidState(format!(
				"flag '{key}' is archived"
			)));
		}

		let overrides = self.load_overrides(key, context).await?;
		let result = evaluate_flag(&flag, &overrides, context, Utc::now());
		debug!(reason = ?result.reason, version = result.flag_version, "flag evaluated");
		Ok(result)
	}

	/// Evaluates several flags concurrently. One key failing never fails the
	/// batch.
	#[instrument(skip(self, keys, context), fields(key_count = keys.len()))]
	pub async fn batch_evaluate(
		&self,
		keys: &[String],
		context: &EvaluationContext,
	) -> BatchEvaluation {
		let mut seen = BTreeSet::new();
		let unique: Vec<&String> = keys.iter().filter(|k| seen.insert(k.as_str())).collect();

		let outcomes = join_all(unique.iter().map(|key| self.evaluate(key, context))).await;

		let mut batch = BatchEvaluation::default();
		for (key, outcome) in unique.into_iter().zip(outcomes) {
			match outcome {
				Ok(result) => {
					batch.results.insert(key.clone(), result);
				}
				Err(err) => {
					let kind = err.kind();
					let expected = matches!(kind, ErrorKind::NotFound | ErrorKind::InvalidState);
					if !expected {
						error!(flag_key = %key, error = %err, "batch evaluation failed for key");
					}
					if expected && self.config.batch_unknown_keys == UnknownKeyPolicy::Omit {
						debug!(flag_key = %key, "omitting unavailable flag from batch");
						continue;
					}
					batch.errors.push(BatchError {
						flag_key: key.clone(),
						kind,
						message: err.to_string(),
					});
				}
			}
		}
		batch
	}

	/// Evaluates every enabled flag for one context.
	#[instrument(skip(self, context))]
	pub async fn client_config(
		&self,
		context: &EvaluationContext,
	) -> Result<HashMap<String, EvaluationResult>> {
		let filter = FlagFilter {
			status: Some(FlagStatus::Enabled),
			..Default::default()
		};
		let now = Utc::now();
		let mut page = Page::new(0, self.config.client_config_page_size).clamped();
		let mut config = HashMap::new();

		loop {
			let listed = self.flags.list(&filter, page).await?;
			let fetched = listed.items.len();
			for flag in listed.items {
				let overrides = self.load_overrides(&flag.key, context).await?;
				let result = evaluate_flag(&flag, &overrides, context, now);
				config.insert(flag.key.clone(), result);
			}
			if fetched < page.limit as usize {
				break;
			}
			page = page.next();
		}

		debug!(flag_count = config.len(), "client config built");
		Ok(config)
	}

	async fn load_flag(&self, key: &str) -> Result<Arc<FeatureFlag>> {
		let store = Arc::clone(&self.flags);
		self.cache.get_flag(key, async move { store.get(key).await }).await
	}

	/// Overrides can only apply to a context carrying a user or tenant id.
	async fn load_overrides(
		&self,
		key: &str,
		context: &EvaluationContext,
	) -> Result<Arc<Vec<Override>>> {
		if context.user_id.is_none() && context.tenant_id.is_none() {
			return Ok(Arc::new(Vec::new()));
		}
		let store = Arc::clone(&self.overrides);
		self.cache
			.get_overrides(key, async move { store.list_active(key, Utc::now()).await })
			.await
	}
}
