//! Error taxonomy for calls that leave the process.
//!
//! Every adapter behind [`VectorStore`](crate::store::VectorStore),
//! [`QueryEmbedder`](crate::embedding::QueryEmbedder) and
//! [`ChatModel`](crate::llm::ChatModel) reports failures as an
//! [`ExternalError`]. The pipeline decides per stage whether a failure is
//! retried, degraded or fatal; [`ExternalError::is_transient`] is the only
//! signal it uses.

use thiserror::Error;

/// Failure of a vector-store, embedder or language-model call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExternalError {
    /// The call did not complete within its deadline.
    #[error("{service} timed out after {millis} ms")]
    Timeout { service: String, millis: u64 },

    /// Connection refused, reset, DNS failure and similar network errors.
    #[error("{service} transport error: {message}")]
    Transport { service: String, message: String },

    /// The endpoint answered with a non-success HTTP status.
    #[error("{service} returned HTTP {code}: {body}")]
    Status {
        service: String,
        code: u16,
        body: String,
    },

    /// The endpoint answered, but the payload could not be understood.
    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: String, message: String },

    /// The backend is not configured or refuses to serve this request.
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },
}

impl ExternalError {
    pub fn timeout(service: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            service: service.into(),
            millis,
        }
    }

    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn status(service: impl Into<String>, code: u16, body: impl Into<String>) -> Self {
        Self::Status {
            service: service.into(),
            code,
            body: body.into(),
        }
    }

    pub fn invalid(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a retry has a chance of succeeding.
    ///
    /// Timeouts and transport errors are transient, as are HTTP 429 and
    /// 5xx. Other statuses, malformed payloads and unconfigured backends
    /// fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { code, .. } => *code == 429 || (500..600).contains(code),
            Self::InvalidResponse { .. } | Self::Unavailable { .. } => false,
        }
    }
}
