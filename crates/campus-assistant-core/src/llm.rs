//! Chat-model contract.
//!
//! Contextualizer, reranker and answerer all talk to a language model
//! through [`ChatModel`]. A request is one system instruction plus an
//! ordered list of messages; the reply is plain text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExternalError;
use crate::models::{ChatTurn, Role};

/// One message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system: system.into(),
            messages,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Receives streamed answer fragments as they arrive.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier for logs.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError>;

    /// Streams fragments into `sink` and returns the full text.
    ///
    /// The default implementation completes in one call and emits the
    /// whole reply as a single fragment.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: TokenSink<'_>,
    ) -> Result<String, ExternalError> {
        let text = self.complete(request).await?;
        sink(&text);
        Ok(text)
    }
}
