//! Caller-facing error classification.
//!
//! # Responsibility
//! - Give every layer error a stable, comparable kind.
//! - Let the embedding layer map failures to rejections without matching on
//!   layer-specific variants.
//!
//! # Invariants
//! - `Contention` is the only kind the engine retries internally.
//! - `InvariantViolation` always fails the triggering operation.

use std::fmt::{Display, Formatter};

/// Stable failure categories shared by store, engine, and grading errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown pool, allocation, scale, or rule.
    NotFound,
    /// Increment would push occupancy above capacity (`PoolFull` at engine level).
    CapacityExceeded,
    /// Decrement would push occupancy below zero.
    Underflow,
    /// Occupant already holds an active allocation in the category.
    AlreadyAllocated,
    /// Allocation is already closed.
    NotActive,
    /// Grade-scale rule failed validation.
    InconsistentRule,
    /// Transient lock failure; safe to retry.
    Contention,
    /// Persisted state contradicts a core invariant; needs an operator.
    InvariantViolation,
    /// Pool category differs from the requested allocation category.
    CategoryMismatch,
    /// Resize would drop capacity below current occupancy.
    CapacityBelowOccupancy,
    /// Pool still has occupants.
    PoolNotEmpty,
    /// Grade-scale name is already taken.
    DuplicateName,
    /// Caller input is malformed (blank label and similar).
    InvalidInput,
    /// Caller cancelled before the commit point.
    Cancelled,
    /// Storage transport or schema failure.
    Storage,
    /// Persisted row cannot be decoded.
    InvalidData,
}

impl ErrorKind {
    /// Returns a stable snake_case name, suitable for logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Underflow => "underflow",
            Self::AlreadyAllocated => "already_allocated",
            Self::NotActive => "not_active",
            Self::InconsistentRule => "inconsistent_rule",
            Self::Contention => "contention",
            Self::InvariantViolation => "invariant_violation",
            Self::CategoryMismatch => "category_mismatch",
            Self::CapacityBelowOccupancy => "capacity_below_occupancy",
            Self::PoolNotEmpty => "pool_not_empty",
            Self::DuplicateName => "duplicate_name",
            Self::InvalidInput => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::Storage => "storage",
            Self::InvalidData => "invalid_data",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Contention)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every public error type in this crate.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    fn only_contention_is_transient() {
        assert!(ErrorKind::Contention.is_transient());
        assert!(!ErrorKind::CapacityExceeded.is_transient());
        assert!(!ErrorKind::InvariantViolation.is_transient());
    }

    #[test]
    fn display_uses_snake_case_name() {
        assert_eq!(ErrorKind::AlreadyAllocated.to_string(), "already_allocated");
    }
}
