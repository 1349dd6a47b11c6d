//! Scripted doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use campus_assistant_core::embedding::QueryEmbedder;
use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatModel, CompletionRequest};
use campus_assistant_core::models::{Chunk, ChunkMetadata, RankedChunk, ScoredCandidate, SourceType};

use crate::retry::RetryPolicy;

type Handler = Box<dyn Fn(&CompletionRequest) -> Result<String, ExternalError> + Send + Sync>;

/// A [`ChatModel`] that answers from a queue, then from a handler.
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Result<String, ExternalError>>>,
    handler: Handler,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(
        handler: impl Fn(&CompletionRequest) -> Result<String, ExternalError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(ExternalError::status("llm", 503, "overloaded")))
    }

    /// Replies in order; fails once the sequence is used up.
    pub fn sequence(replies: Vec<Result<String, ExternalError>>) -> Self {
        let model = Self::failing();
        *model.queue.lock().unwrap() = replies.into();
        model
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self.queue.lock().unwrap().pop_front();
        match queued {
            Some(reply) => reply,
            None => (self.handler)(request),
        }
    }
}

/// An embedder that returns the same vector for every query.
pub struct StaticEmbedder {
    vector: Option<Vec<f32>>,
}

impl StaticEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
        }
    }

    pub fn failing() -> Self {
        Self { vector: None }
    }
}

#[async_trait]
impl QueryEmbedder for StaticEmbedder {
    fn model_name(&self) -> &str {
        "static"
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, ExternalError> {
        self.vector
            .clone()
            .ok_or_else(|| ExternalError::transport("embedder", "connection refused"))
    }
}

pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_secs(5))
}

pub fn chunk(id: &str, text: &str, source_type: SourceType, course_id: Option<i64>) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            url: format!("https://ki-campus.org/{}", id),
            title: format!("Title {}", id),
            source_type,
            course_id,
            module_id: None,
        },
    }
}

pub fn candidate(id: &str, fused_score: f64) -> ScoredCandidate {
    ScoredCandidate {
        chunk: chunk(id, &format!("text of {}", id), SourceType::Cms, None),
        dense_score: fused_score,
        sparse_score: fused_score,
        fused_score,
    }
}

pub fn ranked(id: &str, rank: usize) -> RankedChunk {
    RankedChunk {
        candidate: candidate(id, 1.0 / rank as f64),
        relevance_rank: rank,
        relevance_score: None,
    }
}
