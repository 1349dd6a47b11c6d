//! Shared plumbing for the HTTP adapters (chat model, embedder, Qdrant).
//!
//! Each adapter owns a `reqwest::Client` with a request timeout and a
//! [`Semaphore`] bounding its in-flight requests. The helpers here map
//! reqwest failures and non-success statuses onto [`ExternalError`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use campus_assistant_core::error::ExternalError;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Builds a client with the adapter's request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Limits concurrent requests to one endpoint.
#[derive(Debug, Clone)]
pub struct Limiter {
    service: &'static str,
    permits: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(service: &'static str, max_concurrency: usize) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, ExternalError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ExternalError::unavailable(self.service, "request limiter closed"))
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub fn transport_error(service: &str, err: reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        ExternalError::Transport {
            service: service.to_string(),
            message: format!("request timed out: {}", err),
        }
    } else if err.is_decode() {
        ExternalError::invalid(service, err.to_string())
    } else {
        ExternalError::transport(service, err.to_string())
    }
}

/// Passes successful responses through, turns everything else into
/// [`ExternalError::Status`] with the (truncated) body.
pub async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    Err(ExternalError::status(service, status.as_u16(), body))
}

/// Reads a JSON body, reporting parse failures as invalid responses.
pub async fn read_json(
    service: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ExternalError> {
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ExternalError::invalid(service, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limiter_bounds_permits() {
        let limiter = Limiter::new("llm", 2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_concurrency_is_raised() {
        assert_eq!(Limiter::new("x", 0).available(), 1);
    }
}
