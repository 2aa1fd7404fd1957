// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:./tally-flags.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
	pub url: String,
	pub max_connections: u32,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_DATABASE_URL.to_string(),
			max_connections: DEFAULT_MAX_CONNECTIONS,
		}
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub max_connections: Option<u32>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			url: self
				.url
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
			max_connections: self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_url() {
		let config = DatabaseConfigLayer::default().finalize();
		assert_eq!(config.url, "sqlite:./tally-flags.db");
		assert_eq!(config.max_connections, 5);
	}

	#[test]
	fn test_custom_url() {
		let layer = DatabaseConfigLayer {
			url: Some("sqlite:/var/lib/tally/flags.db".to_string()),
			max_connections: None,
		};
		let config = layer.finalize();
		assert_eq!(config.url, "sqlite:/var/lib/tally/flags.db");
	}

	#[test]
	fn test_merge_keeps_unset_fields() {
		let mut base = DatabaseConfigLayer {
			url: Some("sqlite:a.db".to_string()),
			max_connections: Some(2),
		};
		base.merge(DatabaseConfigLayer {
			url: None,
			max_connections: Some(8),
		});
		assert_eq!(base.url.as_deref(), Some("sqlite:a.db"));
		assert_eq!(base.max_connections, Some(8));
	}
}
