// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Tally feature flags engine.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`TALLY_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use tally_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("flags database at {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub flags: FlagsConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`TALLY_SERVER_*`)
/// 2. Config file (`/etc/tally/flags.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge `sources` lowest precedence first, then finalize.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let flags = layer.flags.unwrap_or_default().finalize();

	validate_config(&database, &flags)?;

	info!(
		database = %database.url,
		max_connections = database.max_connections,
		log_format = %logging.format,
		cache_ttl_secs = flags.cache_ttl_secs,
		batch_unknown_keys = %flags.batch_unknown_keys,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		logging,
		flags,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(database: &DatabaseConfig, flags: &FlagsConfig) -> Result<(), ConfigError> {
	if database.url.trim().is_empty() {
		return Err(ConfigError::Validation(
			"database url must not be empty".to_string(),
		));
	}
	if database.max_connections == 0 {
		return Err(ConfigError::Validation(
			"TALLY_SERVER_DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
		));
	}
	if flags.client_config_page_size == 0 {
		return Err(ConfigError::Validation(
			"TALLY_SERVER_FLAGS_CLIENT_CONFIG_PAGE_SIZE must be at least 1".to_string(),
		));
	}
	if flags.cache_max_capacity == 0 {
		return Err(ConfigError::Validation(
			"TALLY_SERVER_FLAGS_CACHE_MAX_CAPACITY must be at least 1".to_string(),
		));
	}

	Ok(())
}
