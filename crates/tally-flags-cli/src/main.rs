// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `tally-flags`: administer and evaluate feature flags from the command line.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tally_flags_core::UserId;
use tally_server_audit::{Actor, SqliteAuditLog};
use tally_server_config::{LogFormat, LoggingConfig, ServerConfig};
use tally_server_flags::{
	run_migrations, EvaluationService, FlagAdminService, FlagCache, SqliteFlagStore,
	SqliteOverrideStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{AuditArgs, ContextArgs, ListArgs, OverrideCommand, PageArgs};

/// Tally feature flags administration and evaluation.
#[derive(Parser, Debug)]
#[command(name = "tally-flags", about = "Tally feature flags engine", version)]
struct Args {
	/// Config file (defaults to /etc/tally/flags.toml)
	#[arg(long, global = true, env = "TALLY_FLAGS_CONFIG")]
	config: Option<PathBuf>,

	/// User id recorded as the actor of mutations
	#[arg(long, global = true, env = "TALLY_FLAGS_ACTOR")]
	actor: Option<UserId>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create a flag from a JSON definition
	Create {
		/// Path to the flag definition, `-` for stdin
		file: PathBuf,
	},
	/// Show one flag
	Get { key: String },
	/// List flags
	List(ListArgs),
	/// Apply a JSON patch to a flag
	Update {
		key: String,
		/// Version the patch was written against
		#[arg(long)]
		version: i64,
		/// Path to the patch, `-` for stdin
		file: PathBuf,
	},
	/// Enable a flag
	Enable {
		key: String,
		#[arg(long)]
		version: i64,
	},
	/// Disable a flag
	Disable {
		key: String,
		#[arg(long)]
		version: i64,
	},
	/// Archive a flag permanently
	Archive {
		key: String,
		#[arg(long)]
		version: i64,
	},
	/// Evaluate one flag for a context
	Evaluate {
		key: String,
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Evaluate several flags for one context
	Batch {
		#[arg(required = true)]
		keys: Vec<String>,
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Evaluate every enabled flag for one context
	ClientConfig {
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Manage per-user and per-tenant overrides
	#[command(subcommand)]
	Override(OverrideCommand),
	/// Delete overrides that have expired
	CleanupOverrides,
	/// Show the audit trail of a flag
	Audit {
		key: String,
		#[command(flatten)]
		filter: AuditArgs,
		#[command(flatten)]
		page: PageArgs,
	},
}

pub(crate) struct Services {
	pub admin: FlagAdminService,
	pub evaluator: EvaluationService,
	pub actor: Actor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => tally_server_config::load_config_with_file(path)?,
		None => tally_server_config::load_config()?,
	};

	init_tracing(&config.logging);
	tracing::debug!(database = %config.database.url, "starting tally-flags");

	let services = build_services(&config, args.actor).await?;
	commands::run(args.command, &services).await
}

fn init_tracing(logging: &LoggingConfig) {
	let json = logging.format == LogFormat::Json;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| logging.level.clone().into()),
		)
		.with(json.then(|| {
			tracing_subscriber::fmt::layer()
				.json()
				.with_writer(std::io::stderr)
		}))
		.with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
		.init();
}

async fn build_services(config: &ServerConfig, actor: Option<UserId>) -> anyhow::Result<Services> {
	let options = SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
	let pool = SqlitePoolOptions::new()
		.max_connections(config.database.max_connections)
		.connect_with(options)
		.await?;
	run_migrations(&pool).await?;

	let flags = Arc::new(SqliteFlagStore::new(pool.clone()));
	let overrides = Arc::new(SqliteOverrideStore::new(pool.clone()));
	let audit = Arc::new(SqliteAuditLog::new(pool));
	let cache = Arc::new(FlagCache::new(
		config.flags.cache_max_capacity,
		config.flags.cache_ttl(),
	));

	let actor = actor
		.map(Actor::user)
		.unwrap_or_else(Actor::system)
		.with_user_agent(concat!("tally-flags/", env!("CARGO_PKG_VERSION")));

	Ok(Services {
		admin: FlagAdminService::new(
			flags.clone(),
			overrides.clone(),
			audit,
			cache.clone(),
			config.flags.clone(),
		),
		evaluator: EvaluationService::new(flags, overrides, cache, config.flags.clone()),
		actor,
	})
}
