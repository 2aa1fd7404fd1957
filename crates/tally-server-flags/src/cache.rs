// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Snapshot cache for flag definitions and override lists.
//!
//! Cached values are immutable `Arc` snapshots. Writers never mutate a cached
//! value in place, so readers holding a previous `Arc` keep a consistent view.
//!
//! Entries are keyed by flag key and a generation. After a commit the admin
//! service advances the key's generation. Reads started afterwards look up
//! the new generation and load from the store, while a load that was already
//! in flight can only fill the retired slot. Concurrent misses within one
//! generation coalesce into a single load through moka's `try_get_with`.
//! Loads that fail are not cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::Mutex;
use tally_flags_core::{FeatureFlag, Override};
use tracing::trace;

use crate::error::{FlagsServerError, Result};

type SlotKey = (String, u64);

/// Per-key generation counters. A key never seen by a writer sits at the
/// floor, which `advance_all` raises past every issued generation.
#[derive(Default)]
struct Generations {
	state: Mutex<GenerationState>,
}

#[derive(Default)]
struct GenerationState {
	issued: u64,
	floor: u64,
	by_key: HashMap<String, u64>,
}

impl Generations {
	fn current(&self, key: &str) -> u64 {
		let state = self.state.lock();
		state.by_key.get(key).copied().unwrap_or(state.floor)
	}

	/// Returns the retired generation.
	fn advance(&self, key: &str) -> u64 {
		let mut state = self.state.lock();
		let retired = state.by_key.get(key).copied().unwrap_or(state.floor);
		state.issued += 1;
		let next = state.issued;
		state.by_key.insert(key.to_string(), next);
		retired
	}

	fn advance_all(&self) {
		let mut state = self.state.lock();
		state.issued += 1;
		state.floor = state.issued;
		state.by_key.clear();
	}
}

pub struct FlagCache {
	flags: Cache<SlotKey, Arc<FeatureFlag>>,
	overrides: Cache<SlotKey, Arc<Vec<Override>>>,
	flag_generations: Generations,
	override_generations: Generations,
}

impl FlagCache {
	pub fn new(max_capacity: u64, ttl: Duration) -> Self {
		Self {
			flags: Cache::builder()
				.max_capacity(max_capacity)
				.time_to_live(ttl)
				.build(),
			overrides: Cache::builder()
				.max_capacity(max_capacity)
				.time_to_live(ttl)
				.build(),
			flag_generations: Generations::default(),
			override_generations: Generations::default(),
		}
	}

	/// Returns the cached flag or runs `load` once for all concurrent callers
	/// of the current generation.
	pub async fn get_flag<F>(&self, key: &str, load: F) -> Result<Arc<FeatureFlag>>
	where
		F: Future<Output = Result<FeatureFlag>>,
	{
		let generation = self.flag_generations.current(key);
		self.flags
			.try_get_with((key.to_string(), generation), async {
				trace!(flag_key = %key, generation, "flag cache miss");
				load.await.map(Arc::new)
			})
			.await
			.map_err(unshare)
	}

	/// Returns the cached active overrides of a flag, loading them on a miss.
	pub async fn get_overrides<F>(&self, flag_key: &str, load: F) -> Result<Arc<Vec<Override>>>
	where
		F: Future<Output = Result<Vec<Override>>>,
	{
		let generation = self.override_generations.current(flag_key);
		self.overrides
			.try_get_with((flag_key.to_string(), generation), async {
				trace!(flag_key = %flag_key, generation, "override cache miss");
				load.await.map(Arc::new)
			})
			.await
			.map_err(unshare)
	}

	/// Call after a committed flag write. The next read reloads from the store.
	pub async fn invalidate_flag(&self, key: &str) {
		let retired = self.flag_generations.advance(key);
		self.flags.invalidate(&(key.to_string(), retired)).await;
	}

	/// Call after a committed override write for `flag_key`.
	pub async fn invalidate_overrides(&self, flag_key: &str) {
		let retired = self.override_generations.advance(flag_key);
		self.overrides
			.invalidate(&(flag_key.to_string(), retired))
			.await;
	}

	pub fn invalidate_all_overrides(&self) {
		self.override_generations.advance_all();
		self.overrides.invalidate_all();
	}
}

/// Recovers an owned error from the shared one moka hands to every waiter.
fn unshare(err: Arc<FlagsServerError>) -> FlagsServerError {
	match Arc::try_unwrap(err) {
		Ok(err) => err,
		Err(shared) => match shared.as_ref() {
			FlagsServerError::NotFound { entity, id } => FlagsServerError::NotFound {
				entity: *entity,
				id: id.clone(),
			},
			FlagsServerError::Conflict(msg) => FlagsServerError::Conflict(msg.clone()),
			FlagsServerError::InvalidState(msg) => FlagsServerError::InvalidState(msg.clone()),
			FlagsServerError::Validation(e) => FlagsServerError::Validation(e.clone()),
			other => FlagsServerError::Internal(other.to_string()),
		},
	}
}
