//! The chat turn pipeline.
//!
//! [`Orchestrator::chat`] runs one turn of a session:
//!
//! ```text
//! message ──► gibberish guard ──► Contextualizer ──► HybridRetriever
//!                                                        │
//!   Answer ◄── CitationParser ◄── QuestionAnswerer ◄── Reranker
//! ```
//!
//! The reply language is detected from the raw message and the last few
//! history turns. Optional stages (contextualize, rerank) degrade and the
//! turn goes on; failures of retrieval or generation end the turn with a
//! cannot-answer reply. Whatever reply the user receives is appended to the
//! session history together with the message.
//!
//! The turn runs under the session lock and races the caller's
//! [`CancellationToken`]. A cancelled turn is dropped mid-flight, which
//! aborts outbound requests and leaves the history untouched.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use campus_assistant_core::citation::CitationParser;
use campus_assistant_core::language::{detect_language, HISTORY_WINDOW};
use campus_assistant_core::llm::{ChatModel, TokenSink};
use campus_assistant_core::models::{Answer, AnswerKind, ChatTurn, Language, Role, Scope, Stage};
use campus_assistant_core::sparse::SparseEncoder;
use campus_assistant_core::store::VectorStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::answerer::{is_gibberish, AnswerParams, QuestionAnswerer, RawAnswer};
use crate::config::{AnswerConfig, Config, StoreConfig};
use crate::contextualizer::Contextualizer;
use crate::embedding::create_embedder;
use crate::error::{Cancelled, TurnError};
use crate::llm::OpenAIChatModel;
use crate::prompts::PromptSet;
use crate::qdrant_store::QdrantStore;
use crate::replies;
use crate::reranker::{RerankParams, Reranker};
use crate::retriever::{HybridRetriever, RetrievalParams};
use crate::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Existing session to continue; `None` opens a new one.
    pub session_id: Option<String>,
    /// Prior turns used to seed a new session.
    pub history: Vec<ChatTurn>,
    pub message: String,
    pub scope: Scope,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, scope: Scope) -> Self {
        Self {
            session_id: None,
            history: Vec::new(),
            message: message.into(),
            scope,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub session_id: String,
    pub answer: Answer,
}

pub struct Orchestrator {
    contextualizer: Contextualizer,
    retriever: HybridRetriever,
    reranker: Reranker,
    answerer: QuestionAnswerer,
    citations: CitationParser,
    sessions: SessionStore,
    replies: AnswerConfig,
}

impl Orchestrator {
    pub fn new(
        contextualizer: Contextualizer,
        retriever: HybridRetriever,
        reranker: Reranker,
        answerer: QuestionAnswerer,
        citations: CitationParser,
        sessions: SessionStore,
        replies: AnswerConfig,
    ) -> Self {
        Self {
            contextualizer,
            retriever,
            reranker,
            answerer,
            citations,
            sessions,
            replies,
        }
    }

    /// Wires every stage from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::new(OpenAIChatModel::new(&config.llm)?);
        let embedder = if config.embedding.is_enabled() {
            Some(create_embedder(&config.embedding)?)
        } else {
            info!("embedding disabled, retrieval is sparse-only");
            None
        };
        let store = open_store(&config.store).await?;
        let prompts = PromptSet::load(config.prompts.dir.as_deref())?;

        let llm_policy = config.llm.retry_policy();
        let retrieval_policy = RetryPolicy::new(
            config.retrieval.max_retries,
            Duration::from_secs(1),
            Duration::from_secs(config.store.timeout_secs.max(config.embedding.timeout_secs)),
        );
        let rerank_policy = RetryPolicy {
            max_retries: config.rerank.max_retries,
            ..llm_policy
        };

        let retriever = HybridRetriever::new(
            store,
            embedder,
            SparseEncoder::new(config.retrieval.vocab_size),
            RetrievalParams {
                top_k: config.retrieval.top_k,
                candidate_multiplier: config.retrieval.candidate_multiplier,
                fusion: config.retrieval.fusion_method(),
            },
            retrieval_policy,
        );
        let reranker = Reranker::new(
            Arc::clone(&model),
            prompts.rerank.clone(),
            RerankParams {
                enabled: config.rerank.enabled,
                top_n: config.rerank.top_n,
                max_chars_per_candidate: config.rerank.max_chars_per_candidate,
            },
            rerank_policy,
        );
        let answerer = QuestionAnswerer::new(
            Arc::clone(&model),
            prompts.answer_long.clone(),
            prompts.answer_short.clone(),
            AnswerParams {
                profile: config.llm.profile,
                max_source_chars: config.answer.max_source_chars,
                max_sources_chars: config.answer.max_sources_chars,
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
            llm_policy,
        );

        Ok(Self::new(
            Contextualizer::new(model, &prompts.contextualize, llm_policy),
            retriever,
            reranker,
            answerer,
            CitationParser::new(config.answer.citation_style),
            SessionStore::new(config.history.max_turns).with_limits(
                config.history.max_sessions,
                config.history.session_idle_ttl(),
            ),
            config.answer.clone(),
        ))
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Runs one turn, or returns [`Cancelled`] if `cancel` fires first.
    pub async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, Cancelled> {
        self.chat_with(request, cancel, None).await
    }

    /// Like [`chat`](Self::chat), streaming answer fragments into `sink`.
    ///
    /// Fragments carry the raw model output; the returned answer has its
    /// citation markers resolved.
    pub async fn chat_streaming(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        sink: TokenSink<'_>,
    ) -> Result<ChatResponse, Cancelled> {
        self.chat_with(request, cancel, Some(sink)).await
    }

    #[instrument(skip_all, fields(session = request.session_id.as_deref().unwrap_or("new")))]
    async fn chat_with(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        sink: Option<TokenSink<'_>>,
    ) -> Result<ChatResponse, Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("chat turn cancelled");
                Err(Cancelled)
            }
            response = self.run_turn(request, sink) => Ok(response),
        }
    }

    async fn run_turn(&self, request: ChatRequest, sink: Option<TokenSink<'_>>) -> ChatResponse {
        let session = self
            .sessions
            .open(request.session_id.as_deref(), &request.history)
            .await;
        let mut ctx = session.lock().await;
        let history = ctx.history.to_vec();

        let answer = self
            .answer_turn(&request.message, &request.scope, &history, sink)
            .await;

        ctx.record_exchange(&request.message, &answer.text);
        debug!(session = %ctx.id, kind = ?answer.kind, turns = ctx.history.len(), "turn complete");
        ChatResponse {
            session_id: ctx.id.clone(),
            answer,
        }
    }

    async fn answer_turn(
        &self,
        message: &str,
        scope: &Scope,
        history: &[ChatTurn],
        sink: Option<TokenSink<'_>>,
    ) -> Answer {
        let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        let language = detect_language(message, recent);

        if is_gibberish(message) {
            let previous = history
                .iter()
                .rev()
                .find(|t| t.role == Role::Assistant);
            let text = match previous {
                Some(turn) if replies::is_not_understood(&turn.text) => {
                    replies::not_understood_again(language, scope, &self.replies)
                }
                _ => replies::not_understood(language).to_string(),
            };
            debug!("message not understood");
            return Answer::plain(text, language, AnswerKind::NotUnderstood);
        }

        let mut degraded = Vec::new();

        let contextualized = self.contextualizer.contextualize(history, message).await;
        if contextualized.degraded {
            degraded.push(Stage::Contextualize);
        }
        let query = contextualized.query.as_str();

        let candidates = match self.retriever.retrieve(query, scope).await {
            Ok(candidates) => candidates,
            Err(e) => return cannot_answer(TurnError::Retrieval(e), language, degraded),
        };

        let reranked = self.reranker.rerank(query, &candidates).await;
        if reranked.degraded {
            degraded.push(Stage::Rerank);
        }
        let sources = reranked.chunks;

        if sources.is_empty() {
            debug!("no usable sources");
            return with_degraded(
                Answer::plain(
                    replies::insufficient_information(language),
                    language,
                    AnswerKind::InsufficientInformation,
                ),
                degraded,
            );
        }

        let generated = match self
            .answerer
            .answer(query, history, &sources, language, sink)
            .await
        {
            Ok(generated) => generated,
            Err(e) => return cannot_answer(TurnError::Generation(e), language, degraded),
        };

        let answer = match generated.raw {
            RawAnswer::NoAnswerFound => Answer::plain(
                replies::insufficient_information(language),
                language,
                AnswerKind::InsufficientInformation,
            ),
            RawAnswer::Text(raw) => {
                let parsed = self
                    .citations
                    .parse(&raw, &sources[..generated.sources_used]);
                Answer {
                    text: parsed.text,
                    language,
                    citations: parsed.citations,
                    kind: AnswerKind::Grounded,
                    degraded: Vec::new(),
                }
            }
        };
        with_degraded(answer, degraded)
    }
}

fn with_degraded(mut answer: Answer, degraded: Vec<Stage>) -> Answer {
    answer.degraded = degraded;
    answer
}

fn cannot_answer(err: TurnError, language: Language, degraded: Vec<Stage>) -> Answer {
    error!(error = %err, "chat turn failed");
    with_degraded(
        Answer::plain(
            replies::cannot_answer(language),
            language,
            AnswerKind::CannotAnswer,
        ),
        degraded,
    )
}

/// Opens the configured [`VectorStore`] backend.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "sqlite" => {
            let path = config
                .path
                .as_deref()
                .context("store.path required for sqlite backend")?;
            Ok(Arc::new(open_sqlite(path).await?))
        }
        "qdrant" => Ok(Arc::new(QdrantStore::new(config)?)),
        other => bail!("Unknown store backend: '{}'", other),
    }
}

async fn open_sqlite(path: &Path) -> Result<SqliteStore> {
    let pool = crate::db::connect(path)
        .await
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    crate::migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}
