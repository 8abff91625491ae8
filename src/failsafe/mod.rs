//! Failsafe mechanisms: circuit breaker, retry, timeouts

mod circuit_breaker;
mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use retry::{RetryPolicy, with_retry};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FailsafeConfig;
use crate::{Error, Result};

/// Combined failsafe wrapper for one downstream service.
#[derive(Clone)]
pub struct Failsafe {
    /// Circuit breaker
    pub circuit_breaker: Arc<CircuitBreaker>,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Hard per-attempt timeout
    pub timeout: Duration,
}

impl Failsafe {
    /// Create a new failsafe from configuration.
    #[must_use]
    pub fn new(name: &str, config: &FailsafeConfig) -> Self {
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::new(name, &config.circuit_breaker)),
            retry_policy: RetryPolicy::new(&config.retry),
            timeout: config.request_timeout,
        }
    }

    /// Run `f` under the full failsafe discipline.
    ///
    /// Order matters for the failure accounting: the circuit is checked
    /// first (an open circuit rejects without network I/O), then each
    /// attempt is timeout-bounded and retried with backoff. The breaker's
    /// failure counter moves exactly once per exhausted call, never per
    /// attempt, so a call that succeeds on a retry counts as a success.
    pub async fn call<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.circuit_breaker.can_proceed() {
            return Err(Error::CircuitOpen(
                self.circuit_breaker.name().to_string(),
            ));
        }

        let timeout = self.timeout;
        let service = self.circuit_breaker.name().to_string();
        let result = with_retry(&self.retry_policy, operation, || {
            let fut = f();
            let service = service.clone();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(service)),
                }
            }
        })
        .await;

        self.record(&result);
        result
    }

    /// Like [`Self::call`] but without retry, for forwarding requests that
    /// must not be sent twice (proxied POSTs and friends). The breaker and
    /// the timeout still apply.
    pub async fn call_once<Fut, T>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if !self.circuit_breaker.can_proceed() {
            return Err(Error::CircuitOpen(
                self.circuit_breaker.name().to_string(),
            ));
        }
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.circuit_breaker.name().to_string())),
        };
        self.record(&result);
        result
    }

    fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) if e.is_retryable() || matches!(e, Error::UpstreamUnavailable(_)) => {
                self.circuit_breaker.record_failure();
            }
            // Application-level errors (404 from a healthy service, auth
            // rejections) say nothing about service health.
            Err(_) => {}
        }
    }
}
