//! Retry with increasing backoff for operations that hit transient I/O.
//!
//! Files picked up by the scanner or the watcher are sometimes still being
//! moved or written by a converter. Reading them a moment later usually works,
//! so callers wrap those reads in a [`RetryPolicy`].

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// How many times to try, how long to wait, and which errors are worth retrying.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; later attempts grow linearly
    pub base_delay: Duration,
    /// Decides whether an error may be retried
    pub retryable: fn(&Error) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            retryable: Error::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default predicate and the given attempt budget.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Replace the retry predicate.
    pub fn with_predicate(mut self, retryable: fn(&Error) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// The last error is returned once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        target: "retry",
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
