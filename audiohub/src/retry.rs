//! Retry policy for service-lifecycle calls
//!
//! One [`RetryPolicy`] value is shared by every relay-unit call. Each attempt is
//! bounded by `attempt_timeout` and by the enclosing operation deadline,
//! whichever comes first; attempts are separated by exponential backoff capped
//! at `max_delay`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Attempt budget and backoff shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

/// Why [`RetryPolicy::run`] gave up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("deadline reached after {attempts} attempt(s): {last_error}")]
    DeadlineExceeded { attempts: u32, last_error: String },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::DeadlineExceeded { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Delay after the `failed`-th failed attempt (1-based)
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, the budget is spent, or `deadline` passes
    ///
    /// `op` receives the timeout granted to that attempt. On success the value
    /// is returned with the number of attempts it took.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        deadline: Instant,
        mut op: F,
    ) -> Result<(T, u32), RetryError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0;
        let mut last_error = String::from("no attempt made");

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt,
                    last_error,
                });
            }

            attempt += 1;
            let budget = self.attempt_timeout.min(deadline - now);
            match tokio::time::timeout(budget, op(budget)).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok((value, attempt));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("attempt timed out after {:?}", budget),
            }

            warn!(
                "{} attempt {}/{} failed: {}",
                label, attempt, self.max_attempts, last_error
            );

            if attempt >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.backoff(attempt);
            if Instant::now() + delay >= deadline {
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt,
                    last_error,
                });
            }
            tokio::time::sleep(delay).await;
        }
    }
}
