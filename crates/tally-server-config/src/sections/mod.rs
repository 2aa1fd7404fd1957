// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod flags;
mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use flags::{FlagsConfig, FlagsConfigLayer, UnknownKeyPolicy};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
