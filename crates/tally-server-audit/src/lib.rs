// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only audit trail for feature flag administration.
//!
//! Every create, update, status change and override change is recorded with
//! the acting user and before/after snapshots. Records are written through
//! [`insert_entry`] inside the same transaction as the mutation, so a
//! mutation and its audit record commit or fail together.

pub mod error;
pub mod event;
pub mod store;

pub use error::{AuditError, AuditResult};
pub use event::{Actor, AuditAction, AuditLogBuilder, AuditLogEntry};
pub use store::{insert_entry, AuditFilter, AuditLog, AuditPage, SqliteAuditLog, AUDIT_SCHEMA};
