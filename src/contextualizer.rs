//! Follow-up question rewriting.
//!
//! Retrieval sees a single query string, so "and how long does it take?"
//! has to become "How long does the course Machine Learning for Everyone
//! take?" before it reaches the retriever. The [`Contextualizer`] asks the
//! chat model for that rewrite.
//!
//! The stage is optional: if the model fails after its retries, or returns
//! nothing, the raw query is used and the turn is marked degraded.

use std::sync::Arc;

use campus_assistant_core::llm::{ChatMessage, ChatModel, CompletionRequest};
use campus_assistant_core::models::ChatTurn;
use campus_assistant_core::prompt::PromptTemplate;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Outcome of [`Contextualizer::contextualize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contextualized {
    pub query: String,
    /// The rewrite failed and `query` is the raw input.
    pub degraded: bool,
}

pub struct Contextualizer {
    model: Arc<dyn ChatModel>,
    system: String,
    policy: RetryPolicy,
}

impl Contextualizer {
    pub fn new(model: Arc<dyn ChatModel>, prompt: &PromptTemplate, policy: RetryPolicy) -> Self {
        Self {
            model,
            system: prompt.render(&Default::default()),
            policy,
        }
    }

    pub async fn contextualize(&self, history: &[ChatTurn], query: &str) -> Contextualized {
        if history.is_empty() {
            return Contextualized {
                query: query.to_string(),
                degraded: false,
            };
        }

        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(query));
        let request = CompletionRequest::new(self.system.clone(), messages);

        let model = &self.model;
        match self
            .policy
            .run("llm", || model.complete(&request))
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                let rewritten = rewritten.trim().to_string();
                debug!(original = query, rewritten = %rewritten, "contextualized query");
                Contextualized {
                    query: rewritten,
                    degraded: false,
                }
            }
            Ok(_) => {
                warn!("contextualizer returned an empty rewrite, using raw query");
                Contextualized {
                    query: query.to_string(),
                    degraded: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "contextualizer failed, using raw query");
                Contextualized {
                    query: query.to_string(),
                    degraded: true,
                }
            }
        }
    }
}
