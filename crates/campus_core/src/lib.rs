//! Core allocation and grade-resolution logic for the campus system.
//! This crate is the single source of truth for capacity and grading invariants.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ContentionPolicy, EngineConfig, StoreConfig};
pub use error::{ErrorKind, HasErrorKind};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::allocation::{Allocation, AllocationId, OccupantId};
pub use model::grade::{
    GradeRuleDraft, GradeScale, GradeScaleRule, GradeScaleTable, Points, RuleId, RuleViolation,
    ScaleId, ScoreSpan, ValidRule,
};
pub use model::pool::{NewPool, PoolCategory, PoolId, PoolSnapshot, ResourcePool};
pub use repo::capacity_store::{SqliteCapacityStore, StoreError, StoreResult};
pub use repo::grade_repo::{
    GradeRepoError, GradeRepoResult, GradeScaleRepository, SqliteGradeScaleRepository,
};
pub use service::allocation_service::{AllocationEngine, AllocationError, AllocationResult};
pub use service::contention::CancellationToken;
pub use service::grade_service::{GradeError, GradeResult, GradeService};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
