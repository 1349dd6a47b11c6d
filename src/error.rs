//! Errors that end a chat turn.

use campus_assistant_core::error::ExternalError;
use thiserror::Error;

/// An indispensable stage failed after its retries.
///
/// The orchestrator turns these into a cannot-answer reply; they never
/// reach the caller as errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TurnError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] ExternalError),

    #[error("answer generation failed: {0}")]
    Generation(#[source] ExternalError),
}

/// The caller cancelled the turn before it completed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("chat turn cancelled")]
pub struct Cancelled;
