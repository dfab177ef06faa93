//! Repository layer: persistence contracts and SQLite implementations.
//!
//! # Responsibility
//! - Keep SQL details inside the core persistence boundary.
//! - Expose transaction-scoped helpers the engines compose into one commit.
//!
//! # Invariants
//! - Every mutation of shared state runs inside a `BEGIN IMMEDIATE`
//!   transaction, so the write lock is held before the first read.
//! - Read paths reject invalid persisted state instead of masking it.

pub(crate) mod allocation_repo;
pub mod capacity_store;
pub mod grade_repo;

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time as Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|_| format!("invalid uuid `{value}` in {column}"))
}
