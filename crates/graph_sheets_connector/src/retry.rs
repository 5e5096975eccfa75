use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::Result;

/// Attempts for long-running extraction calls.
pub const RETRY_MAX_ATTEMPTS: usize = 14;
/// Attempts for interactive calls where the caller is waiting on the answer.
pub const RETRY_SYNC_MAX_ATTEMPTS: usize = 5;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retries failed calls with exponential backoff.
///
/// Explicitly constructed and passed around rather than global so tests can
/// substitute a zero-delay policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(RETRY_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Profile for interactive ("sync") calls.
    pub fn sync() -> Self {
        RetryPolicy::new(RETRY_SYNC_MAX_ATTEMPTS)
    }

    /// Zero-delay policy, for tests.
    pub fn no_backoff(max_attempts: usize) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Call `f`, retrying retryable failures up to the attempt budget.
    ///
    /// Backoff doubles between attempts, capped. The last error is returned
    /// unchanged once attempts are exhausted.
    pub async fn call<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    debug!(
                        error = %err,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying failed call",
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
            }
        }
    }
}
