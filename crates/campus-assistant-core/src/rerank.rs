//! Relevance judgments for LLM-based reranking.
//!
//! The reranker shows a chat model a numbered batch of candidates and asks
//! for lines of the form `Doc: 3, Relevance: 8`. This module owns the
//! runtime-free half of that exchange: formatting a batch, parsing the
//! judgments, and turning judgments (or their absence) into
//! [`RankedChunk`]s.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::fusion::sort_candidates;
use crate::models::{RankedChunk, ScoredCandidate};
use crate::prompt::truncate_chars;

/// A parsed `Doc: n, Relevance: s` line. `position` is 1-based within the batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Judgment {
    pub position: usize,
    pub relevance: f64,
}

/// Candidates per model call: short texts fit more per prompt.
pub fn choice_batch_size(max_chars_per_candidate: usize) -> usize {
    if max_chars_per_candidate <= 1500 {
        10
    } else {
        5
    }
}

/// Renders a batch as `Document 1:\n<text>` blocks.
pub fn format_batch(batch: &[ScoredCandidate], max_chars: usize) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "Document {}:\n{}",
                i + 1,
                truncate_chars(&c.chunk.text, max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn judgment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)doc(?:ument)?\s*:?\s*(\d+)\s*,\s*relevance\s*:?\s*(\d+(?:\.\d+)?)")
            .expect("judgment pattern is valid")
    })
}

/// Extracts judgments from model output.
///
/// Positions outside `1..=batch_len` are ignored; a repeated position keeps
/// its first judgment.
pub fn parse_judgments(text: &str, batch_len: usize) -> Vec<Judgment> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for caps in judgment_re().captures_iter(text) {
        let Ok(position) = caps[1].parse::<usize>() else {
            continue;
        };
        let Ok(relevance) = caps[2].parse::<f64>() else {
            continue;
        };
        if position == 0 || position > batch_len || seen.contains(&position) {
            continue;
        }
        seen.push(position);
        out.push(Judgment {
            position,
            relevance,
        });
    }
    out
}

/// Orders judged candidates by relevance, then fused score, then id.
///
/// `relevance` maps indices into `candidates` to their judged score.
/// Candidates without a judgment were deemed irrelevant and are left out.
pub fn rank_by_relevance(
    candidates: &[ScoredCandidate],
    relevance: &HashMap<usize, f64>,
    top_n: usize,
) -> Vec<RankedChunk> {
    let mut judged: Vec<(&ScoredCandidate, f64)> = relevance
        .iter()
        .filter_map(|(idx, score)| candidates.get(*idx).map(|c| (c, *score)))
        .collect();

    judged.sort_by(|(a, ra), (b, rb)| {
        rb.partial_cmp(ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.fused_score
                    .partial_cmp(&a.fused_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    judged
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, (c, score))| RankedChunk {
            candidate: c.clone(),
            relevance_rank: i + 1,
            relevance_score: Some(score),
        })
        .collect()
}

/// The first `top_n` candidates in fused order, without judge scores.
pub fn fused_order(candidates: &[ScoredCandidate], top_n: usize) -> Vec<RankedChunk> {
    let mut ordered = candidates.to_vec();
    sort_candidates(&mut ordered);
    ordered
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, c)| RankedChunk {
            candidate: c,
            relevance_rank: i + 1,
            relevance_score: None,
        })
        .collect()
}
