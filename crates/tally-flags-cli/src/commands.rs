// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tally_flags_core::{
	EvaluationContext, FlagKind, FlagPatch, FlagStatus, FlagValue, NewFlag, NewOverride,
	OverrideId, OverrideTarget, Page, UserId, DEFAULT_PAGE_LIMIT,
};
use tally_server_audit::{AuditAction, AuditFilter};
use tally_server_flags::FlagFilter;
use tracing::instrument;

use crate::{Command, Services};

#[derive(Debug, Clone, Args)]
pub struct PageArgs {
	#[arg(long, default_value_t = 0)]
	pub offset: u32,
	#[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
	pub limit: u32,
}

impl PageArgs {
	fn page(&self) -> Page {
		Page::new(self.offset, self.limit)
	}
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
	#[arg(long)]
	pub status: Option<FlagStatus>,
	#[arg(long)]
	pub kind: Option<FlagKind>,
	/// Repeatable; a flag must carry every given tag
	#[arg(long = "tag")]
	pub tags: Vec<String>,
	/// Case-insensitive substring of key or name
	#[arg(long)]
	pub search: Option<String>,
	#[command(flatten)]
	pub page: PageArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ContextArgs {
	#[arg(long)]
	pub user: Option<String>,
	#[arg(long)]
	pub tenant: Option<String>,
	/// Repeatable `name=value`; values that parse as JSON keep their type
	#[arg(long = "attr")]
	pub attrs: Vec<String>,
}

impl ContextArgs {
	fn context(&self) -> anyhow::Result<EvaluationContext> {
		let mut ctx = EvaluationContext::new();
		if let Some(user) = &self.user {
			ctx = ctx.with_user_id(user);
		}
		if let Some(tenant) = &self.tenant {
			ctx = ctx.with_tenant_id(tenant);
		}
		for attr in &self.attrs {
			let (name, value) = parse_attribute(attr)?;
			ctx = ctx.with_attribute(name, value);
		}
		Ok(ctx)
	}
}

#[derive(Debug, Clone, Args)]
pub struct AuditArgs {
	#[arg(long)]
	pub action: Option<AuditAction>,
	#[arg(long = "by")]
	pub actor_user_id: Option<UserId>,
	/// RFC 3339 lower bound, inclusive
	#[arg(long)]
	pub from: Option<DateTime<Utc>>,
	/// RFC 3339 upper bound, inclusive
	#[arg(long)]
	pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Subcommand)]
pub enum OverrideCommand {
	/// Force a value for one user or tenant
	Add {
		key: String,
		#[arg(long)]
		target: OverrideTarget,
		#[arg(long = "id")]
		target_id: String,
		/// `true`, `false` or a variant name
		#[arg(long)]
		value: String,
		#[arg(long, default_value = "")]
		reason: String,
		#[arg(long)]
		expires_at: Option<DateTime<Utc>>,
	},
	/// Delete an override by id
	Rm { id: OverrideId },
	/// List a flag's overrides, newest first
	List {
		key: String,
		#[command(flatten)]
		page: PageArgs,
	},
}

#[instrument(skip_all)]
pub(crate) async fn run(command: Command, services: &Services) -> anyhow::Result<()> {
	let admin = &services.admin;
	let actor = &services.actor;

	match command {
		Command::Create { file } => {
			let new_flag: NewFlag = read_json(&file)?;
			print_json(&admin.create_flag(new_flag, actor).await?)
		}
		Command::Get { key } => print_json(&admin.get_flag(&key).await?),
		Command::List(args) => {
			let filter = FlagFilter {
				status: args.status,
				kind: args.kind,
				tags: args.tags,
				search: args.search,
			};
			print_json(&admin.list_flags(&filter, args.page.page()).await?)
		}
		Command::Update { key, version, file } => {
			let patch: FlagPatch = read_json(&file)?;
			print_json(&admin.update_flag(&key, version, patch, actor).await?)
		}
		Command::Enable { key, version } => print_json(&admin.enable(&key, version, actor).await?),
		Command::Disable { key, version } => {
			print_json(&admin.disable(&key, version, actor).await?)
		}
		Command::Archive { key, version } => {
			print_json(&admin.archive(&key, version, actor).await?)
		}
		Command::Evaluate { key, context } => {
			let ctx = context.context()?;
			print_json(&services.evaluator.evaluate(&key, &ctx).await?)
		}
		Command::Batch { keys, context } => {
			let ctx = context.context()?;
			print_json(&services.evaluator.batch_evaluate(&keys, &ctx).await)
		}
		Command::ClientConfig { context } => {
			let ctx = context.context()?;
			print_json(&services.evaluator.client_config(&ctx).await?)
		}
		Command::Override(cmd) => run_override(cmd, services).await,
		Command::CleanupOverrides => {
			let removed = admin.cleanup_expired_overrides().await?;
			print_json(&serde_json::json!({ "removed": removed }))
		}
		Command::Audit { key, filter, page } => {
			let filter = AuditFilter {
				action: filter.action,
				actor_user_id: filter.actor_user_id,
				from: filter.from,
				to: filter.to,
			};
			print_json(&admin.audit_log(&key, &filter, page.page()).await?)
		}
	}
}

async fn run_override(command: OverrideCommand, services: &Services) -> anyhow::Result<()> {
	let admin = &services.admin;
	match command {
		OverrideCommand::Add {
			key,
			target,
			target_id,
			value,
			reason,
			expires_at,
		} => {
			let new_override = NewOverride {
				target,
				target_id,
				value: parse_flag_value(&value),
				reason,
				expires_at,
			};
			print_json(
				&admin
					.create_override(&key, new_override, &services.actor)
					.await?,
			)
		}
		OverrideCommand::Rm { id } => {
			admin.delete_override(id, &services.actor).await?;
			print_json(&serde_json::json!({ "deleted": id.to_string() }))
		}
		OverrideCommand::List { key, page } => {
			print_json(&admin.list_overrides(&key, page.page()).await?)
		}
	}
}

fn parse_attribute(raw: &str) -> anyhow::Result<(String, Value)> {
	let Some((name, value)) = raw.split_once('=') else {
		bail!("attribute '{raw}' must look like name=value");
	};
	let name = name.trim();
	if name.is_empty() {
		bail!("attribute '{raw}' has an empty name");
	}
	let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
	Ok((name.to_string(), value))
}

fn parse_flag_value(raw: &str) -> FlagValue {
	match raw {
		"true" => FlagValue::Boolean(true),
		"false" => FlagValue::Boolean(false),
		other => FlagValue::Variant(other.to_string()),
	}
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
	let content = if path == Path::new("-") {
		let mut buf = String::new();
		std::io::stdin()
			.read_to_string(&mut buf)
			.context("reading stdin")?;
		buf
	} else {
		std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
	};
	serde_json::from_str(&content).with_context(|| format!("parsing {}", display(path)))
}

fn display(path: &Path) -> String {
	if path == Path::new("-") {
		"stdin".to_string()
	} else {
		path.display().to_string()
	}
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn attributes_keep_json_types() {
		assert_eq!(
			parse_attribute("seats=42").unwrap(),
			("seats".to_string(), serde_json::json!(42))
		);
		assert_eq!(
			parse_attribute("beta=true").unwrap(),
			("beta".to_string(), serde_json::json!(true))
		);
		assert_eq!(
			parse_attribute("plan=pro").unwrap(),
			("plan".to_string(), serde_json::json!("pro"))
		);
		assert!(parse_attribute("plan").is_err());
		assert!(parse_attribute("=pro").is_err());
	}

	#[test]
	fn flag_values_from_cli() {
		assert_eq!(parse_flag_value("true"), FlagValue::Boolean(true));
		assert_eq!(
			parse_flag_value("treatment"),
			FlagValue::Variant("treatment".to_string())
		);
	}

	#[test]
	fn context_args_build_context() {
		let args = ContextArgs {
			user: Some("u1".to_string()),
			tenant: Some("acme".to_string()),
			attrs: vec!["country=DE".to_string()],
		};
		let ctx = args.context().unwrap();
		assert_eq!(ctx.bucketing_identifier(), "u1");
		assert_eq!(ctx.tenant_id.as_deref(), Some("acme"));
		assert_eq!(ctx.attributes["country"], serde_json::json!("DE"));
	}

	#[test]
	fn reads_flag_definition_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{
				"key": "new_checkout",
				"name": "New checkout",
				"kind": "percentage",
				"default_value": {{"type": "boolean", "value": false}},
				"rules": [{{"conditions": [], "rollout_percentage": 50,
					"value": {{"type": "boolean", "value": true}}}}]
			}}"#
		)
		.unwrap();
		let new_flag: NewFlag = read_json(file.path()).unwrap();
		assert_eq!(new_flag.key, "new_checkout");
		assert_eq!(new_flag.rules.len(), 1);
		assert_eq!(new_flag.rules[0].rollout_percentage, 50);
	}
}
