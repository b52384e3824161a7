//! Bounded retry with exponential backoff around external calls.

use crate::domain::error::DomainError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Lower cap applied when the failure is a malformed response.
    pub malformed_max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-call timeout. A timed out call is a transient failure.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            malformed_max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn cap_for(&self, error: &DomainError) -> u32 {
        match error {
            DomainError::MalformedResponse(_) => self.malformed_max_attempts.min(self.max_attempts),
            _ => self.max_attempts,
        }
    }
}

/// Outcome of a retried call with the number of attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, DomainError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Every attempt is bounded by `call_timeout`.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, label: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(DomainError::Transient(format!(
                "{label}: timed out after {}ms",
                policy.call_timeout.as_millis()
            ))),
        };

        let error = match result {
            Ok(value) => return Attempted { result: Ok(value), attempts },
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Attempted { result: Err(error), attempts };
        }
        if attempts >= policy.cap_for(&error) {
            warn!(label, attempts, error = %error, "retries exhausted");
            return Attempted { result: Err(error), attempts };
        }

        let delay = policy.delay_for(attempts);
        warn!(
            label,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
