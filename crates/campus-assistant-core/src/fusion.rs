//! Fusion of dense and sparse retrieval results.
//!
//! The retriever runs both modalities against a [`VectorStore`](crate::store::VectorStore)
//! and hands the two ranked hit lists to [`fuse`], which is pure and
//! deterministic:
//!
//! 1. Deduplicate each list by chunk id (best score wins).
//! 2. Min-max normalise each list to `[0, 1]`.
//! 3. Combine per chunk with the configured [`FusionMethod`]; a chunk absent
//!    from one list contributes nothing for that modality.
//! 4. Drop chunks without a url (they could never be cited).
//! 5. Sort by fused score (desc), then chunk id (asc).
//! 6. Truncate to `limit`.

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{Chunk, ScoredCandidate};
use crate::store::StoreHit;

/// How the two modality scores are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FusionMethod {
    /// `fused = w × dense + (1 - w) × sparse` over normalised scores.
    Weighted { dense_weight: f64 },
    /// Reciprocal rank fusion: `Σ 1 / (k + rank)`, rank starting at 1.
    ReciprocalRank { k: f64 },
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Weighted { dense_weight: 0.5 }
    }
}

/// Fusion tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub method: FusionMethod,
    /// Maximum candidates to return.
    pub limit: usize,
}

/// Result of [`fuse`].
#[derive(Debug, Clone, Default)]
pub struct Fused {
    pub candidates: Vec<ScoredCandidate>,
    /// Ids of chunks dropped because their url was empty.
    pub dropped_without_url: Vec<String>,
}

/// Fuse dense and sparse hit lists into one ranking.
pub fn fuse(dense: &[StoreHit], sparse: &[StoreHit], params: &FusionParams) -> Fused {
    let dense = dedup_hits(dense);
    let sparse = dedup_hits(sparse);

    let dense_norm = normalize_scores(&dense);
    let sparse_norm = normalize_scores(&sparse);

    let dense_rank: HashMap<&str, usize> = rank_positions(&dense);
    let sparse_rank: HashMap<&str, usize> = rank_positions(&sparse);

    let mut chunks: HashMap<&str, &Chunk> = HashMap::new();
    for hit in dense.iter().chain(sparse.iter()) {
        chunks.entry(hit.chunk.id.as_str()).or_insert(&hit.chunk);
    }

    let mut fused = Fused::default();

    for (id, chunk) in chunks {
        if !chunk.has_url() {
            fused.dropped_without_url.push(id.to_string());
            continue;
        }

        let d = dense_norm.get(id).copied();
        let s = sparse_norm.get(id).copied();

        let fused_score = match params.method {
            FusionMethod::Weighted { dense_weight } => {
                dense_weight * d.unwrap_or(0.0) + (1.0 - dense_weight) * s.unwrap_or(0.0)
            }
            FusionMethod::ReciprocalRank { k } => {
                let rrf = |rank: Option<&usize>| rank.map(|r| 1.0 / (k + *r as f64)).unwrap_or(0.0);
                rrf(dense_rank.get(id)) + rrf(sparse_rank.get(id))
            }
        };

        fused.candidates.push(ScoredCandidate {
            chunk: chunk.clone(),
            dense_score: d.unwrap_or(0.0),
            sparse_score: s.unwrap_or(0.0),
            fused_score,
        });
    }

    sort_candidates(&mut fused.candidates);
    fused.candidates.truncate(params.limit);
    fused.dropped_without_url.sort();

    fused
}

/// Sort by fused score (desc), then chunk id (asc).
pub fn sort_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Min-max normalise raw scores to `[0.0, 1.0]`, keyed by chunk id.
///
/// If all scores are equal, they are normalised to `1.0`.
pub fn normalize_scores(hits: &[StoreHit]) -> HashMap<&str, f64> {
    if hits.is_empty() {
        return HashMap::new();
    }

    let s_min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let s_max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.score - s_min) / (s_max - s_min)
            };
            (h.chunk.id.as_str(), norm)
        })
        .collect()
}

/// Keeps the best-scoring hit per chunk id, ordered best-first.
fn dedup_hits(hits: &[StoreHit]) -> Vec<StoreHit> {
    let mut best: HashMap<&str, &StoreHit> = HashMap::new();
    for hit in hits {
        best.entry(hit.chunk.id.as_str())
            .and_modify(|cur| {
                if hit.score > cur.score {
                    *cur = hit;
                }
            })
            .or_insert(hit);
    }
    let unique: Vec<StoreHit> = best.into_values().cloned().collect();
    crate::store::rank_hits(unique, usize::MAX)
}

fn rank_positions(hits: &[StoreHit]) -> HashMap<&str, usize> {
    hits.iter()
        .enumerate()
        .map(|(i, h)| (h.chunk.id.as_str(), i + 1))
        .collect()
}
