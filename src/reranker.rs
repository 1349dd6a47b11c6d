//! LLM choice-select reranking.
//!
//! Candidates are shown to the chat model in numbered batches (see
//! [`choice_batch_size`]) and the model answers with `Doc: n, Relevance: s`
//! lines. Batches are judged concurrently. Candidates the model leaves out
//! are treated as irrelevant.
//!
//! Reranking is optional: if any batch fails after its retries, or the
//! model's replies contain no parsable judgment at all, the stage falls
//! back to the first `top_n` candidates in fused order and marks the turn
//! degraded.

use std::collections::HashMap;
use std::sync::Arc;

use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatMessage, ChatModel, CompletionRequest};
use campus_assistant_core::models::{RankedChunk, ScoredCandidate};
use campus_assistant_core::prompt::PromptTemplate;
use campus_assistant_core::rerank::{
    choice_batch_size, format_batch, fused_order, parse_judgments, rank_by_relevance, Judgment,
};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Outcome of [`Reranker::rerank`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
    pub chunks: Vec<RankedChunk>,
    /// The judge failed and `chunks` are in fused order.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerankParams {
    pub enabled: bool,
    pub top_n: usize,
    pub max_chars_per_candidate: usize,
}

impl Default for RerankParams {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: 5,
            max_chars_per_candidate: 1500,
        }
    }
}

pub struct Reranker {
    model: Arc<dyn ChatModel>,
    prompt: PromptTemplate,
    params: RerankParams,
    policy: RetryPolicy,
}

impl Reranker {
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompt: PromptTemplate,
        params: RerankParams,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            model,
            prompt,
            params,
            policy,
        }
    }

    pub fn top_n(&self) -> usize {
        self.params.top_n
    }

    pub async fn rerank(&self, query: &str, candidates: &[ScoredCandidate]) -> Reranked {
        let top_n = self.params.top_n;
        if !self.params.enabled || candidates.len() <= 1 {
            return Reranked {
                chunks: fused_order(candidates, top_n),
                degraded: false,
            };
        }

        let batch_size = choice_batch_size(self.params.max_chars_per_candidate);
        let batches: Vec<&[ScoredCandidate]> = candidates.chunks(batch_size).collect();
        let results = join_all(batches.iter().map(|b| self.judge_batch(query, b))).await;

        let mut relevance: HashMap<usize, f64> = HashMap::new();
        for (batch_idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(judgments) => {
                    for j in judgments {
                        relevance.insert(batch_idx * batch_size + j.position - 1, j.relevance);
                    }
                }
                Err(e) => {
                    warn!(batch = batch_idx, error = %e, "rerank batch failed, using fused order");
                    return self.fallback(candidates);
                }
            }
        }

        if relevance.is_empty() {
            warn!("reranker returned no parsable judgments, using fused order");
            return self.fallback(candidates);
        }

        debug!(
            candidates = candidates.len(),
            judged = relevance.len(),
            "reranked candidates"
        );
        Reranked {
            chunks: rank_by_relevance(candidates, &relevance, top_n),
            degraded: false,
        }
    }

    fn fallback(&self, candidates: &[ScoredCandidate]) -> Reranked {
        Reranked {
            chunks: fused_order(candidates, self.params.top_n),
            degraded: true,
        }
    }

    async fn judge_batch(
        &self,
        query: &str,
        batch: &[ScoredCandidate],
    ) -> Result<Vec<Judgment>, ExternalError> {
        let mut values = HashMap::new();
        values.insert(
            "documents",
            format_batch(batch, self.params.max_chars_per_candidate),
        );
        values.insert("query", query.to_string());
        let request = CompletionRequest::new(
            String::new(),
            vec![ChatMessage::user(self.prompt.render(&values))],
        );

        let model = &self.model;
        let reply = self
            .policy
            .run("llm", || model.complete(&request))
            .await?;
        Ok(parse_judgments(&reply, batch.len()))
    }
}
