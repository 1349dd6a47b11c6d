//! In-memory [`VectorStore`] for tests, demos and WASM targets.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Dense search is
//! brute-force cosine similarity; sparse search is Okapi BM25 over the
//! tokenised chunk text, weighted by the query's term weights.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::ExternalError;
use crate::models::Chunk;
use crate::sparse::{tokenize, SparseQuery};

use super::{rank_hits, SearchFilter, StoreHit, VectorStore};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct StoredChunk {
    chunk: Chunk,
    vector: Option<Vec<f32>>,
    term_counts: HashMap<String, usize>,
    length: usize,
}

/// In-memory store.
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Adds or replaces a chunk (matched by id), optionally with its embedding.
    pub fn insert(&self, chunk: Chunk, vector: Option<Vec<f32>>) {
        let tokens = tokenize(&chunk.text);
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        for t in &tokens {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        let stored = StoredChunk {
            chunk,
            vector,
            term_counts,
            length: tokens.len(),
        };

        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        chunks.retain(|sc| sc.chunk.id != stored.chunk.id);
        chunks.push(stored);
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn dense_search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let hits = chunks
            .iter()
            .filter(|sc| filter.matches(&sc.chunk.metadata))
            .filter_map(|sc| {
                sc.vector.as_ref().map(|v| StoreHit {
                    chunk: sc.chunk.clone(),
                    score: cosine_similarity(vector, v) as f64,
                })
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn sparse_search(
        &self,
        query: &SparseQuery,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let n = chunks.len() as f64;
        if n == 0.0 {
            return Ok(Vec::new());
        }
        let avg_len = chunks.iter().map(|sc| sc.length as f64).sum::<f64>() / n;

        let idf: HashMap<&str, f64> = query
            .terms
            .iter()
            .map(|t| {
                let df = chunks
                    .iter()
                    .filter(|sc| sc.term_counts.contains_key(&t.term))
                    .count() as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                (t.term.as_str(), idf)
            })
            .collect();

        let hits = chunks
            .iter()
            .filter(|sc| filter.matches(&sc.chunk.metadata))
            .filter_map(|sc| {
                let norm = 1.0 - BM25_B + BM25_B * (sc.length as f64 / avg_len.max(1.0));
                let score: f64 = query
                    .terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *sc.term_counts.get(&t.term)? as f64;
                        let idf = idf.get(t.term.as_str()).copied().unwrap_or(0.0);
                        Some(t.weight as f64 * idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm))
                    })
                    .sum();
                (score > 0.0).then(|| StoreHit {
                    chunk: sc.chunk.clone(),
                    score,
                })
            })
            .collect();
        Ok(rank_hits(hits, k))
    }
}
