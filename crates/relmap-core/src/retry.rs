//! Retry policy applied to single and batched statement execution.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;

/// Decides whether a failed statement is attempted again.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// `attempt` is 1 for the first failure.
    fn should_retry(&self, attempt: u32, error: &Error) -> bool;

    /// Pause before the next attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        let _ = attempt;
        Duration::ZERO
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _error: &Error) -> bool {
        false
    }
}

/// Retry retryable errors up to a total number of attempts, with linear
/// backoff.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetry {
    max_attempts: u32,
    backoff: Duration,
}

impl BoundedRetry {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl RetryPolicy for BoundedRetry {
    fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Serializable retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retrying.
    pub max_attempts: u32,
    /// Base backoff in milliseconds, multiplied by the attempt number.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

impl RetryConfig {
    /// Build the policy described by this configuration.
    pub fn policy(&self) -> Box<dyn RetryPolicy> {
        if self.max_attempts <= 1 {
            Box::new(NoRetry)
        } else {
            Box::new(BoundedRetry::new(
                self.max_attempts,
                Duration::from_millis(self.backoff_ms),
            ))
        }
    }
}

/// Run `op` under `policy`, attaching `sql` to the error that escapes.
pub fn run_with_retry<T>(
    policy: &dyn RetryPolicy,
    sql: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !policy.should_retry(attempt, &err) {
                    return Err(err.with_sql(sql));
                }
                tracing::warn!(sql, attempt, error = %err, "Retrying statement");
                let pause = policy.backoff(attempt);
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }
            }
        }
    }
}
