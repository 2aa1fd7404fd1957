// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Offset pagination shared by every listing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
	pub offset: u32,
	pub limit: u32,
}

impl Page {
	pub fn new(offset: u32, limit: u32) -> Self {
		Self { offset, limit }.clamped()
	}

	/// Limit forced into `1..=MAX_PAGE_LIMIT`.
	pub fn clamped(self) -> Self {
		Self {
			offset: self.offset,
			limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
		}
	}

	pub fn next(self) -> Self {
		Self {
			offset: self.offset.saturating_add(self.limit),
			limit: self.limit,
		}
	}
}

impl Default for Page {
	fn default() -> Self {
		Self {
			offset: 0,
			limit: DEFAULT_PAGE_LIMIT,
		}
	}
}
