//! Domain model for capacity pools, allocations, and grade scales.
//!
//! # Responsibility
//! - Define the records the allocation and grading engines operate on.
//! - Hold pure validation and lookup logic that needs no storage.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Timestamps are Unix epoch milliseconds.

pub mod allocation;
pub mod grade;
pub mod pool;
