//! Runtime configuration for storage and contention handling.
//!
//! # Responsibility
//! - Hold tunables for lock waits and retry backoff.
//! - Deserialize from any serde source with per-field defaults.
//!
//! # Invariants
//! - Every wait is bounded: `busy_timeout_ms` caps one lock wait and
//!   `max_retries` caps the number of engine-level retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 10;
const DEFAULT_MAX_BACKOFF_MS: u64 = 500;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Connection-level storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum time one statement waits on a held write lock.
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Retry policy applied when a mutation hits lock contention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentionPolicy {
    /// Retries after the first attempt; `0` surfaces contention immediately.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Cap for exponential growth.
    pub max_backoff_ms: u64,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
}

impl ContentionPolicy {
    /// Computes the delay before retry number `attempt` (0-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.initial_backoff_ms as f64) * multiplier;
        let capped = delay_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether `attempt` retries have already been spent.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// Top-level configuration bundle handed to the embedding layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub contention: ContentionPolicy,
}
