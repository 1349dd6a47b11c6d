//! Grounded answer generation.
//!
//! The [`QuestionAnswerer`] builds one completion request per turn:
//!
//! - system: the answer template for the configured [`ContextProfile`]
//!   with `{language}` filled in
//! - messages: the (already capped) chat history, then the user message
//!   `<QUERY>:\n{query}\n---\n\n<SOURCES>:\n[doc1]\nContent: ...`
//!
//! Sources are numbered in rank order, so `[docN]` in the reply refers to
//! the N-th reranked chunk. The `small` profile caps each source at
//! `max_source_chars` and stops adding sources once `max_sources_chars` is
//! reached; [`GeneratedAnswer::sources_used`] reports how many made it in.
//!
//! Replies wrapped as `{"answer": "..."}` (optionally inside a code fence)
//! are unwrapped, and a literal `NO ANSWER FOUND` becomes
//! [`RawAnswer::NoAnswerFound`]. Citation markers are left for the
//! citation parser.

use std::sync::Arc;

use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatMessage, ChatModel, CompletionRequest, TokenSink};
use campus_assistant_core::models::{ChatTurn, Language, RankedChunk};
use campus_assistant_core::prompt::{truncate_chars, PromptTemplate};
use tracing::{debug, warn};

use crate::config::ContextProfile;
use crate::retry::RetryPolicy;

pub const NO_ANSWER_FOUND: &str = "NO ANSWER FOUND";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAnswer {
    /// Generated text, citation markers still in place.
    Text(String),
    /// The model found no answer in the sources.
    NoAnswerFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    pub raw: RawAnswer,
    /// Number of leading sources that were shown to the model.
    pub sources_used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerParams {
    pub profile: ContextProfile,
    pub max_source_chars: usize,
    pub max_sources_chars: usize,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for AnswerParams {
    fn default() -> Self {
        Self {
            profile: ContextProfile::Large,
            max_source_chars: 2000,
            max_sources_chars: 8000,
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

pub struct QuestionAnswerer {
    model: Arc<dyn ChatModel>,
    long_prompt: PromptTemplate,
    short_prompt: PromptTemplate,
    params: AnswerParams,
    policy: RetryPolicy,
}

impl QuestionAnswerer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        long_prompt: PromptTemplate,
        short_prompt: PromptTemplate,
        params: AnswerParams,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            model,
            long_prompt,
            short_prompt,
            params,
            policy,
        }
    }

    /// Generates an answer from `sources`.
    ///
    /// With a `sink`, fragments are streamed into it as they arrive. A
    /// streamed attempt is only retried while nothing has been emitted yet.
    pub async fn answer(
        &self,
        query: &str,
        history: &[ChatTurn],
        sources: &[RankedChunk],
        language: Language,
        sink: Option<TokenSink<'_>>,
    ) -> Result<GeneratedAnswer, ExternalError> {
        let (request, sources_used) = self.build_request(query, history, sources, language);
        debug!(
            model = self.model.model_name(),
            sources = sources_used,
            history = history.len(),
            "generating answer"
        );

        let reply = match sink {
            None => {
                let model = &self.model;
                self.policy
                    .run("llm", || model.complete(&request))
                    .await?
            }
            Some(sink) => self.stream(&request, sink).await?,
        };

        Ok(GeneratedAnswer {
            raw: extract_answer(&reply),
            sources_used,
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        sink: TokenSink<'_>,
    ) -> Result<String, ExternalError> {
        let mut attempt = 0;
        loop {
            let mut emitted = false;
            let result = {
                let mut forward = |fragment: &str| {
                    emitted = true;
                    sink(fragment);
                };
                self.policy
                    .attempt("llm", self.model.complete_streaming(request, &mut forward))
                    .await
            };
            match result {
                Ok(text) => return Ok(text),
                Err(err) if !emitted && self.policy.should_retry(attempt, &err) => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    warn!(attempt, error = %err, "retrying streamed answer");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn build_request(
        &self,
        query: &str,
        history: &[ChatTurn],
        sources: &[RankedChunk],
        language: Language,
    ) -> (CompletionRequest, usize) {
        let template = match self.params.profile {
            ContextProfile::Large => &self.long_prompt,
            ContextProfile::Small => &self.short_prompt,
        };
        let system = template.render_one("language", language.name());

        let (sources_text, sources_used) = format_sources(sources, &self.params);
        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(format!(
            "<QUERY>:\n{}\n---\n\n<SOURCES>:\n{}",
            query, sources_text
        )));

        let request = CompletionRequest::new(system, messages)
            .with_temperature(self.params.temperature)
            .with_max_tokens(self.params.max_tokens);
        (request, sources_used)
    }
}

/// Renders sources as numbered `[docN]` blocks.
///
/// Returns the text and how many sources it contains.
pub fn format_sources(sources: &[RankedChunk], params: &AnswerParams) -> (String, usize) {
    let mut blocks: Vec<String> = Vec::new();
    let mut total = 0;

    for (i, source) in sources.iter().enumerate() {
        let chunk = source.chunk();
        let content = match params.profile {
            ContextProfile::Large => chunk.text.as_str(),
            ContextProfile::Small => truncate_chars(&chunk.text, params.max_source_chars),
        };
        let block = format!(
            "[doc{}]\nContent: {}\nMetadata: title: {}, url: {}",
            i + 1,
            content.trim(),
            chunk.metadata.title,
            chunk.metadata.url
        );

        if params.profile == ContextProfile::Small {
            let len = block.chars().count();
            if !blocks.is_empty() && total + len > params.max_sources_chars {
                break;
            }
            total += len;
        }
        blocks.push(block);
    }

    let used = blocks.len();
    (blocks.join("\n\n"), used)
}

/// Unwraps a JSON or fenced reply and detects `NO ANSWER FOUND`.
pub fn extract_answer(reply: &str) -> RawAnswer {
    let mut text = strip_fence(reply.trim()).trim().to_string();

    if text.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            match value.get("answer").and_then(|a| a.as_str()) {
                Some(answer) => text = answer.trim().to_string(),
                None => return RawAnswer::NoAnswerFound,
            }
        }
    }

    if text.is_empty() || text.trim_end_matches('.') == NO_ANSWER_FOUND {
        RawAnswer::NoAnswerFound
    } else {
        RawAnswer::Text(text)
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest)
}

/// Input that cannot be a question: no letters or digits, a single
/// one-character token, or only vowel-less tokens longer than two chars.
pub fn is_gibberish(query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if !q.chars().any(char::is_alphanumeric) {
        return true;
    }

    let words: Vec<&str> = q.split_whitespace().collect();
    if words.len() == 1 && words[0].chars().count() == 1 {
        return true;
    }

    let looks_random = |word: &&str| {
        word.chars().count() > 2 && !word.chars().any(|c| "aeiouäöüy".contains(c))
    };
    words.iter().all(looks_random)
}
