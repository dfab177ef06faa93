//! Bounded retry on lock contention, plus caller-driven cancellation.
//!
//! # Invariants
//! - Only errors whose kind is `Contention` are retried.
//! - The number of retries never exceeds `ContentionPolicy::max_retries`.
//! - A cancelled token stops further attempts; the in-flight attempt rolls
//!   back if it has not reached its commit point.

use crate::config::ContentionPolicy;
use crate::error::{ErrorKind, HasErrorKind};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared flag a caller flips to abandon a pending mutation.
///
/// Checked at the start of each attempt and right before commit. Cancelling
/// after the commit has no effect; the change must be reversed explicitly.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs `attempt` until it succeeds, fails with a non-contention error, or the
/// retry budget is spent.
pub(crate) fn retry_on_contention<T, E, F>(
    policy: &ContentionPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, E>
where
    E: HasErrorKind,
    F: FnMut() -> Result<T, E>,
{
    let mut retries = 0;
    loop {
        match attempt() {
            Err(err) if err.kind() == ErrorKind::Contention && !policy.is_exhausted(retries) => {
                let delay = policy.backoff_delay(retries);
                retries += 1;
                warn!(
                    "event=contention_retry module=service operation={} attempt={} delay_ms={}",
                    operation,
                    retries,
                    delay.as_millis()
                );
                thread::sleep(delay);
            }
            outcome => return outcome,
        }
    }
}
