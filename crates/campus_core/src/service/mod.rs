//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into transactional use cases.
//! - Apply bounded contention retry and caller cancellation uniformly.
//!
//! # Invariants
//! - Services never bypass repository validation or persistence contracts.
//! - A service operation commits at most once.

pub mod allocation_service;
pub mod contention;
pub mod grade_service;
