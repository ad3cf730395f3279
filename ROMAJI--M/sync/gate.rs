use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Polling budget for a single dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Polls performed before giving up.
    pub max_attempts: u32,
    /// Delay before each poll, in milliseconds.
    pub poll_interval_ms: u64,
}

impl GatePolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, poll_interval_ms: u64) -> Self {
        Self {
            max_attempts,
            poll_interval_ms,
        }
    }

    /// Delay between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest a gate can stay pending.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::new(60, 250)
    }
}

/// A dependency never appeared within its polling budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("timed out waiting for {label} after {attempts} polls ({elapsed_ms}ms)")]
pub struct TimeoutError {
    /// What was being waited for.
    pub label: String,
    /// Polls performed.
    pub attempts: u32,
    /// Time spent waiting.
    pub elapsed_ms: u64,
}

/// Polls `predicate` every `poll_interval` until it holds.
///
/// The first poll happens one interval after the call. Fails after exactly
/// `max_attempts` unsuccessful polls; a zero budget still polls once.
///
/// # Errors
/// Returns [`TimeoutError`] when every poll fails.
pub async fn await_condition<F>(
    mut predicate: F,
    policy: GatePolicy,
    label: &str,
) -> Result<(), TimeoutError>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    for _ in 0..max_attempts {
        sleep(policy.poll_interval()).await;
        if predicate() {
            return Ok(());
        }
    }
    Err(TimeoutError {
        label: label.to_string(),
        attempts: max_attempts,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
