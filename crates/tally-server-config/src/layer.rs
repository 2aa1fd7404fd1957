// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as read from a single source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, FlagsConfigLayer, LoggingConfigLayer};

/// One source's view of the configuration. Unset sections and fields fall
/// through to lower-precedence sources when merged.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub flags: Option<FlagsConfigLayer>,
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.flags, other.flags, FlagsConfigLayer::merge);
	}
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *base = Some(incoming),
		(_, None) => {}
	}
}
