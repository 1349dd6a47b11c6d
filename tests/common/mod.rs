//! Test doubles and pipeline builders shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use campus_assistant::answerer::{AnswerParams, QuestionAnswerer};
use campus_assistant::config::AnswerConfig;
use campus_assistant::contextualizer::Contextualizer;
use campus_assistant::orchestrator::Orchestrator;
use campus_assistant::prompts::PromptSet;
use campus_assistant::reranker::{RerankParams, Reranker};
use campus_assistant::retriever::{HybridRetriever, RetrievalParams};
use campus_assistant::retry::RetryPolicy;
use campus_assistant::session::SessionStore;
use campus_assistant_core::citation::CitationParser;
use campus_assistant_core::embedding::QueryEmbedder;
use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatModel, CompletionRequest};
use campus_assistant_core::models::{Chunk, ChunkMetadata, SourceType};
use campus_assistant_core::sparse::SparseEncoder;
use campus_assistant_core::store::memory::InMemoryStore;
use campus_assistant_core::store::VectorStore;

/// Which pipeline stage a request to the shared chat model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Contextualize,
    Rerank,
    Answer,
}

pub fn classify(request: &CompletionRequest) -> Call {
    let last = request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or("");
    if last.starts_with("<QUERY>:") {
        Call::Answer
    } else if last.contains("Let's try this now:") {
        Call::Rerank
    } else {
        Call::Contextualize
    }
}

type Script = Box<dyn Fn(Call, &CompletionRequest) -> Result<String, ExternalError> + Send + Sync>;

/// A chat model scripted per pipeline stage.
pub struct StageModel {
    script: Script,
    queue: Mutex<VecDeque<Result<String, ExternalError>>>,
    log: Mutex<Vec<(Call, CompletionRequest)>>,
}

impl StageModel {
    pub fn new(
        script: impl Fn(Call, &CompletionRequest) -> Result<String, ExternalError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            queue: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Answers with `answer`, judges every document 5 and rewrites to the
    /// raw user message.
    pub fn answering(answer: &str) -> Self {
        let answer = answer.to_string();
        Self::new(move |call, request| match call {
            Call::Answer => Ok(answer.clone()),
            Call::Rerank => Ok("Doc: 1, Relevance: 5\nDoc: 2, Relevance: 5\nDoc: 3, Relevance: 5".into()),
            Call::Contextualize => Ok(request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default()),
        })
    }

    pub fn calls(&self, call: Call) -> usize {
        self.log.lock().unwrap().iter().filter(|(c, _)| *c == call).count()
    }

    pub fn requests(&self, call: Call) -> Vec<CompletionRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl ChatModel for StageModel {
    fn model_name(&self) -> &str {
        "stage-script"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        let call = classify(request);
        self.log.lock().unwrap().push((call, request.clone()));
        if let Some(reply) = self.queue.lock().unwrap().pop_front() {
            return reply;
        }
        (self.script)(call, request)
    }
}

/// Embeds a text as its counts of a few marker words, so dense similarity
/// follows shared vocabulary.
pub struct KeywordEmbedder;

pub const EMBEDDING_VOCAB: [&str; 4] = ["neural", "zertifikat", "kurs", "dauer"];

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    EMBEDDING_VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32 + 0.01)
        .collect()
}

#[async_trait]
impl QueryEmbedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        Ok(keyword_vector(text))
    }
}

pub fn chunk(id: &str, url: &str, text: &str, source_type: SourceType, course_id: Option<i64>) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            url: url.to_string(),
            title: format!("Title {}", id),
            source_type,
            course_id,
            module_id: None,
        },
    }
}

/// Inserts chunks with their keyword embeddings.
pub fn memory_store(chunks: Vec<Chunk>) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for c in chunks {
        let v = keyword_vector(&c.text);
        store.insert(c, Some(v));
    }
    Arc::new(store)
}

pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_secs(5))
}

pub struct Options {
    pub max_turns: usize,
    pub max_sessions: usize,
    pub top_n: usize,
    pub retries: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_sessions: 10_000,
            top_n: 5,
            retries: 0,
        }
    }
}

pub fn orchestrator(
    model: Arc<dyn ChatModel>,
    store: Arc<dyn VectorStore>,
    options: Options,
) -> Orchestrator {
    let prompts = PromptSet::builtin().unwrap();
    let policy = fast_policy(options.retries);
    Orchestrator::new(
        Contextualizer::new(Arc::clone(&model), &prompts.contextualize, policy),
        HybridRetriever::new(
            store,
            Some(Arc::new(KeywordEmbedder)),
            SparseEncoder::default(),
            RetrievalParams::default(),
            policy,
        ),
        Reranker::new(
            Arc::clone(&model),
            prompts.rerank.clone(),
            RerankParams {
                top_n: options.top_n,
                ..Default::default()
            },
            policy,
        ),
        QuestionAnswerer::new(
            model,
            prompts.answer_long.clone(),
            prompts.answer_short.clone(),
            AnswerParams::default(),
            policy,
        ),
        CitationParser::default(),
        SessionStore::new(options.max_turns)
            .with_limits(options.max_sessions, Duration::from_secs(3600)),
        AnswerConfig::default(),
    )
}
