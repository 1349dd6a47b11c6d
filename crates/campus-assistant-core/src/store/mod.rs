//! Vector-store abstraction consumed by the hybrid retriever.
//!
//! The [`VectorStore`] trait exposes the two retrieval modalities the
//! retriever fuses: dense nearest-neighbour search over embeddings and
//! sparse term-weighted search. Both take the same [`SearchFilter`] so the
//! metadata restriction is applied inside the backend, before `k` is cut.
//!
//! Implementations must be `Send + Sync`; the retriever issues the dense
//! and sparse searches concurrently against the same store.

pub mod memory;

use async_trait::async_trait;

use crate::error::ExternalError;
use crate::models::{Chunk, ChunkMetadata, Scope, SourceType};
use crate::sparse::SparseQuery;

/// Metadata predicate applied by the store.
///
/// All set fields must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub source_type: Option<SourceType>,
    pub course_id: Option<i64>,
    pub module_id: Option<i64>,
}

impl SearchFilter {
    /// Translates a caller scope into a filter.
    ///
    /// Without a course, retrieval is limited to CMS pages. With a course,
    /// only that course's material (and module, when given) is searched.
    pub fn from_scope(scope: &Scope) -> Self {
        match scope.course_id {
            None => Self {
                source_type: Some(SourceType::Cms),
                course_id: None,
                module_id: None,
            },
            Some(course_id) => Self {
                source_type: None,
                course_id: Some(course_id),
                module_id: scope.module_id,
            },
        }
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(st) = self.source_type {
            if meta.source_type != st {
                return false;
            }
        }
        if let Some(course_id) = self.course_id {
            if meta.course_id != Some(course_id) {
                return false;
            }
        }
        if let Some(module_id) = self.module_id {
            if meta.module_id != Some(module_id) {
                return false;
            }
        }
        true
    }
}

/// A chunk returned by one retrieval modality with its raw score.
///
/// Scores are only comparable within one modality and one call
/// (cosine similarity for dense, BM25-style for sparse).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Read-only retrieval backend.
///
/// | Method | Modality |
/// |--------|----------|
/// | [`dense_search`](VectorStore::dense_search) | nearest neighbours of the query embedding |
/// | [`sparse_search`](VectorStore::sparse_search) | term-weighted keyword match |
///
/// Both return at most `k` hits ordered best-first.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs (e.g. `"sqlite"`).
    fn name(&self) -> &str;

    async fn dense_search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError>;

    async fn sparse_search(
        &self,
        query: &SparseQuery,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError>;
}

/// Orders hits best-first with chunk id as the tie-breaker, then cuts to `k`.
pub fn rank_hits(mut hits: Vec<StoreHit>, k: usize) -> Vec<StoreHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(k);
    hits
}
