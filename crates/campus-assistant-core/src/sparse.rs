//! Term-weighted query encoding for sparse (keyword) retrieval.
//!
//! Queries are lowercased, split into word tokens and weighted by term
//! frequency normalised by token count. Each term also carries a stable
//! hashed index so that index-based backends (Qdrant sparse vectors) and
//! term-based backends (SQLite FTS5, the in-memory store) can be fed from
//! the same [`SparseQuery`].

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Default size of the hashed term space.
pub const DEFAULT_VOCAB_SIZE: u32 = 30_000;

/// One weighted query term.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTerm {
    pub term: String,
    /// Hashed index in `[0, vocab_size)`.
    pub index: u32,
    pub weight: f32,
}

/// Sparse representation of a query, terms sorted alphabetically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseQuery {
    pub terms: Vec<SparseTerm>,
}

impl SparseQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn weight_of(&self, term: &str) -> Option<f32> {
        self.terms.iter().find(|t| t.term == term).map(|t| t.weight)
    }

    /// Index/value pairs sorted by index, with hash collisions summed.
    pub fn indexed(&self) -> (Vec<u32>, Vec<f32>) {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for t in &self.terms {
            *merged.entry(t.index).or_insert(0.0) += t.weight;
        }
        merged.into_iter().unzip()
    }
}

/// Encodes text into a [`SparseQuery`].
#[derive(Debug, Clone)]
pub struct SparseEncoder {
    vocab_size: u32,
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_VOCAB_SIZE)
    }
}

impl SparseEncoder {
    pub fn new(vocab_size: u32) -> Self {
        Self {
            vocab_size: vocab_size.max(1),
        }
    }

    pub fn encode(&self, text: &str) -> SparseQuery {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return SparseQuery::default();
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }

        let total = tokens.len() as f32;
        let terms = counts
            .into_iter()
            .map(|(term, count)| SparseTerm {
                term: term.to_string(),
                index: self.term_index(term),
                weight: count as f32 / total,
            })
            .collect();

        SparseQuery { terms }
    }

    /// Stable hash of a term into the vocabulary space.
    pub fn term_index(&self, term: &str) -> u32 {
        let digest = Sha256::digest(term.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        prefix % self.vocab_size
    }
}

/// Lowercases and splits on anything that is not a letter, digit or `_`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
