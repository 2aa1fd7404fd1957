// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, FlagsConfigLayer, LogFormat, LoggingConfigLayer, UnknownKeyPolicy,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/tally/flags.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: TALLY_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()?),
			logging: Some(load_logging_from_env()?),
			flags: Some(load_flags_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr<Err = String>,
{
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|message| ConfigError::InvalidValue {
				key: name.to_string(),
				message,
			}),
		None => Ok(None),
	}
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("TALLY_SERVER_DATABASE_URL"),
		max_connections: env_u32("TALLY_SERVER_DATABASE_MAX_CONNECTIONS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("TALLY_SERVER_LOGGING_LEVEL"),
		format: env_parse::<LogFormat>("TALLY_SERVER_LOGGING_FORMAT")?,
	})
}

fn load_flags_from_env() -> Result<FlagsConfigLayer, ConfigError> {
	Ok(FlagsConfigLayer {
		cache_max_capacity: env_u64("TALLY_SERVER_FLAGS_CACHE_MAX_CAPACITY")?,
		cache_ttl_secs: env_u64("TALLY_SERVER_FLAGS_CACHE_TTL_SECS")?,
		client_config_page_size: env_u32("TALLY_SERVER_FLAGS_CLIENT_CONFIG_PAGE_SIZE")?,
		batch_unknown_keys: env_parse::<UnknownKeyPolicy>("TALLY_SERVER_FLAGS_BATCH_UNKNOWN_KEYS")?,
		record_redundant_toggles: env_bool("TALLY_SERVER_FLAGS_RECORD_REDUNDANT_TOGGLES"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn write_toml(content: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(content.as_bytes()).unwrap();
		file
	}

	#[test]
	fn precedence_orders_env_last() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn missing_toml_file_yields_empty_layer() {
		let dir = tempfile::tempdir().unwrap();
		let source = TomlSource::new(dir.path().join("absent.toml"));
		assert_eq!(source.load().unwrap(), ServerConfigLayer::default());
	}

	#[test]
	fn toml_sections_parse() {
		let file = write_toml(
			r#"
[database]
url = "sqlite:/tmp/flags.db"

[logging]
format = "json"

[flags]
cache_ttl_secs = 15
batch_unknown_keys = "report"
record_redundant_toggles = false
"#,
		);
		let layer = TomlSource::new(file.path()).load().unwrap();
		let database = layer.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite:/tmp/flags.db"));
		assert_eq!(database.max_connections, None);
		assert_eq!(layer.logging.unwrap().format, Some(LogFormat::Json));
		let flags = layer.flags.unwrap();
		assert_eq!(flags.cache_ttl_secs, Some(15));
		assert_eq!(flags.batch_unknown_keys, Some(UnknownKeyPolicy::Report));
		assert_eq!(flags.record_redundant_toggles, Some(false));
	}

	#[test]
	fn malformed_toml_is_a_parse_error() {
		let file = write_toml("[flags\ncache_ttl_secs = ");
		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn env_numbers_reject_garbage() {
		std::env::set_var("TALLY_TEST_SOURCES_BAD_U64", "ten");
		let err = env_u64("TALLY_TEST_SOURCES_BAD_U64").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TALLY_TEST_SOURCES_BAD_U64"));
		std::env::remove_var("TALLY_TEST_SOURCES_BAD_U64");
	}

	#[test]
	fn env_enum_reports_parse_message() {
		std::env::set_var("TALLY_TEST_SOURCES_POLICY", "drop");
		let err = env_parse::<UnknownKeyPolicy>("TALLY_TEST_SOURCES_POLICY").unwrap_err();
		assert!(err.to_string().contains("unknown batch policy"));
		std::env::remove_var("TALLY_TEST_SOURCES_POLICY");
	}

	#[test]
	fn empty_env_values_are_unset() {
		std::env::set_var("TALLY_TEST_SOURCES_EMPTY", "");
		assert_eq!(env_var("TALLY_TEST_SOURCES_EMPTY"), None);
		assert_eq!(env_u32("TALLY_TEST_SOURCES_EMPTY").unwrap(), None);
		std::env::remove_var("TALLY_TEST_SOURCES_EMPTY");
	}

	#[test]
	fn env_bool_accepts_one_and_true() {
		std::env::set_var("TALLY_TEST_SOURCES_BOOL_A", "1");
		std::env::set_var("TALLY_TEST_SOURCES_BOOL_B", "TRUE");
		std::env::set_var("TALLY_TEST_SOURCES_BOOL_C", "no");
		assert_eq!(env_bool("TALLY_TEST_SOURCES_BOOL_A"), Some(true));
		assert_eq!(env_bool("TALLY_TEST_SOURCES_BOOL_B"), Some(true));
		assert_eq!(env_bool("TALLY_TEST_SOURCES_BOOL_C"), Some(false));
	}
}
