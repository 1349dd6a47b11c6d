//! Per-attempt timeouts and exponential backoff for external calls.
//!
//! Every outbound call of a pipeline stage goes through a [`RetryPolicy`]:
//! each attempt is bounded by `attempt_timeout` (an elapsed timeout counts
//! as a transient [`ExternalError::Timeout`]), transient failures are
//! retried up to `max_retries` times, and permanent failures return
//! immediately.
//!
//! Backoff doubles from `base_delay` and is capped at `base_delay × 32`:
//! with the default one second that is 1s, 2s, 4s, 8s, 16s, 32s.

use std::future::Future;
use std::time::Duration;

use campus_assistant_core::error::ExternalError;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempt_timeout,
        }
    }

    /// A single attempt, no retries.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, attempt_timeout)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }

    /// Runs one attempt under the per-attempt timeout.
    pub async fn attempt<T, Fut>(&self, service: &str, fut: Fut) -> Result<T, ExternalError>
    where
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        match tokio::time::timeout(self.attempt_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::timeout(
                service,
                self.attempt_timeout.as_millis() as u64,
            )),
        }
    }

    /// Whether a failed attempt number `attempt` (0-based) should be retried.
    pub fn should_retry(&self, attempt: u32, err: &ExternalError) -> bool {
        attempt < self.max_retries && err.is_transient()
    }

    /// Calls `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, service: &str, mut op: F) -> Result<T, ExternalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let mut attempt = 0;
        loop {
            match self.attempt(service, op()).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt, &err) => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying external call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
