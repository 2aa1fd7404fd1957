// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flag engine tuning: snapshot cache, client config paging and the
//! policies for batch evaluation and redundant status toggles.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What batch evaluation does with keys that are unknown or archived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
	/// Leave them out of the response.
	#[default]
	Omit,
	/// List them in the response's error section.
	Report,
}

impl fmt::Display for UnknownKeyPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			UnknownKeyPolicy::Omit => f.write_str("omit"),
			UnknownKeyPolicy::Report => f.write_str("report"),
		}
	}
}

impl FromStr for UnknownKeyPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"omit" => Ok(UnknownKeyPolicy::Omit),
			"report" => Ok(UnknownKeyPolicy::Report),
			other => Err(format!("unknown batch policy '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlagsConfigLayer {
	pub cache_max_capacity: Option<u64>,
	pub cache_ttl_secs: Option<u64>,
	pub client_config_page_size: Option<u32>,
	pub batch_unknown_keys: Option<UnknownKeyPolicy>,
	pub record_redundant_toggles: Option<bool>,
}

impl FlagsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.cache_max_capacity.is_some() {
			self.cache_max_capacity = other.cache_max_capacity;
		}
		if other.cache_ttl_secs.is_some() {
			self.cache_ttl_secs = other.cache_ttl_secs;
		}
		if other.client_config_page_size.is_some() {
			self.client_config_page_size = other.client_config_page_size;
		}
		if other.batch_unknown_keys.is_some() {
			self.batch_unknown_keys = other.batch_unknown_keys;
		}
		if other.record_redundant_toggles.is_some() {
			self.record_redundant_toggles = other.record_redundant_toggles;
		}
	}

	pub fn finalize(self) -> FlagsConfig {
		let defaults = FlagsConfig::default();
		FlagsConfig {
			cache_max_capacity: self
				.cache_max_capacity
				.unwrap_or(defaults.cache_max_capacity),
			cache_ttl_secs: self.cache_ttl_secs.unwrap_or(defaults.cache_ttl_secs),
			client_config_page_size: self
				.client_config_page_size
				.unwrap_or(defaults.client_config_page_size),
			batch_unknown_keys: self
				.batch_unknown_keys
				.unwrap_or(defaults.batch_unknown_keys),
			record_redundant_toggles: self
				.record_redundant_toggles
				.unwrap_or(defaults.record_redundant_toggles),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagsConfig {
	/// Entries per snapshot cache (flags and override lists each).
	pub cache_max_capacity: u64,
	pub cache_ttl_secs: u64,
	pub client_config_page_size: u32,
	pub batch_unknown_keys: UnknownKeyPolicy,
	/// Audit enable/disable calls that find the flag already in that state.
	pub record_redundant_toggles: bool,
}

impl FlagsConfig {
	pub fn cache_ttl(&self) -> Duration {
		Duration::from_secs(self.cache_ttl_secs)
	}
}

impl Default for FlagsConfig {
	fn default() -> Self {
		Self {
			cache_max_capacity: 10_000,
			cache_ttl_secs: 300,
			client_config_page_size: 200,
			batch_unknown_keys: UnknownKeyPolicy::Omit,
			record_redundant_toggles: true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = FlagsConfigLayer::default().finalize();
		assert_eq!(config, FlagsConfig::default());
		assert_eq!(config.cache_ttl(), Duration::from_secs(300));
		assert_eq!(config.batch_unknown_keys, UnknownKeyPolicy::Omit);
		assert!(config.record_redundant_toggles);
	}

	#[test]
	fn test_merge_overrides_only_set_fields() {
		let mut base = FlagsConfigLayer {
			cache_ttl_secs: Some(60),
			client_config_page_size: Some(50),
			..Default::default()
		};
		base.merge(FlagsConfigLayer {
			client_config_page_size: Some(500),
			batch_unknown_keys: Some(UnknownKeyPolicy::Report),
			..Default::default()
		});
		let config = base.finalize();
		assert_eq!(config.cache_ttl_secs, 60);
		assert_eq!(config.client_config_page_size, 500);
		assert_eq!(config.batch_unknown_keys, UnknownKeyPolicy::Report);
	}

	#[test]
	fn test_policy_parse() {
		assert_eq!("Report".parse::<UnknownKeyPolicy>(), Ok(UnknownKeyPolicy::Report));
		assert!("drop".parse::<UnknownKeyPolicy>().is_err());
	}
}
