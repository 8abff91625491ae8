//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::Error;
use crate::config::RetryConfig;

/// Retry policy for outbound calls
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each subsequent attempt
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
        }
    }
}

/// Execute a future with retry and doubling backoff.
///
/// Only transport-level errors are retried; auth, validation, and circuit
/// rejections propagate immediately. Returns the last error once the retry
/// budget is spent.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_retries {
                    if attempt > 0 {
                        debug!(operation = name, attempts = attempt + 1, "Retry budget exhausted");
                    }
                    return Err(e);
                }
                attempt += 1;
                debug!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
