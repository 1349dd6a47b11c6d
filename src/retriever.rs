//! Hybrid dense + sparse retrieval.
//!
//! [`HybridRetriever::retrieve`] embeds the query and encodes it into
//! sparse term weights, runs the dense and sparse searches concurrently
//! against the [`VectorStore`] with the scope's filter, and fuses the two
//! hit lists with [`fuse`]. Each modality is asked for
//! `candidate_multiplier × top_k` hits; the fused list is cut to `top_k`.
//!
//! Every external call goes through the retrieval [`RetryPolicy`]. Failure
//! after retries is returned to the orchestrator, which ends the turn.
//!
//! Without an embedder (`[embedding] provider = "disabled"`) the dense
//! modality is skipped and fusion runs over the sparse hits alone.

use std::sync::Arc;

use campus_assistant_core::embedding::QueryEmbedder;
use campus_assistant_core::error::ExternalError;
use campus_assistant_core::fusion::{fuse, FusionMethod, FusionParams};
use campus_assistant_core::models::{ScoredCandidate, Scope};
use campus_assistant_core::sparse::SparseEncoder;
use campus_assistant_core::store::{SearchFilter, StoreHit, VectorStore};
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub candidate_multiplier: usize,
    pub fusion: FusionMethod,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 20,
            candidate_multiplier: 2,
            fusion: FusionMethod::default(),
        }
    }
}

pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn QueryEmbedder>>,
    encoder: SparseEncoder,
    params: RetrievalParams,
    policy: RetryPolicy,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn QueryEmbedder>>,
        encoder: SparseEncoder,
        params: RetrievalParams,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            encoder,
            params,
            policy,
        }
    }

    /// At most `top_k` candidates, best first, each with a non-empty url.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &Scope,
    ) -> Result<Vec<ScoredCandidate>, ExternalError> {
        let filter = SearchFilter::from_scope(scope);
        let k = self.params.top_k * self.params.candidate_multiplier.max(1);

        let (dense, sparse) = tokio::try_join!(
            self.dense_hits(query, &filter, k),
            self.sparse_hits(query, &filter, k)
        )?;

        debug!(
            store = self.store.name(),
            dense = dense.len(),
            sparse = sparse.len(),
            "retrieved candidates"
        );

        let fused = fuse(
            &dense,
            &sparse,
            &FusionParams {
                method: self.params.fusion,
                limit: self.params.top_k,
            },
        );

        if !fused.dropped_without_url.is_empty() {
            warn!(
                chunks = ?fused.dropped_without_url,
                "excluded retrieved chunks without url"
            );
        }

        Ok(fused.candidates)
    }

    async fn dense_hits(
        &self,
        query: &str,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        let store = &self.store;

        let vector = self
            .policy
            .run("embedder", || embedder.embed_query(query))
            .await?;
        self.policy
            .run(store.name(), || store.dense_search(&vector, filter, k))
            .await
    }

    async fn sparse_hits(
        &self,
        query: &str,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let sparse = self.encoder.encode(query);
        if sparse.is_empty() {
            return Ok(Vec::new());
        }
        let store = &self.store;
        self.policy
            .run(store.name(), || store.sparse_search(&sparse, filter, k))
            .await
    }
}
