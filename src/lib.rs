//! # Campus Assistant
//!
//! Retrieval-augmented chat assistant for an AI learning platform.
//!
//! A learner's message, together with the conversation so far and an
//! optional course/module scope, is answered from the platform's indexed
//! content (CMS pages and course material) with citations linking back to
//! the pages it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────┐
//! │Contextualizer│──▶│ HybridRetriever │──▶│ Reranker │
//! │  (chat LLM)  │   │ dense + sparse  │   │(chat LLM)│
//! └──────────────┘   └───────┬─────────┘   └────┬─────┘
//!                            │                  ▼
//!                   ┌────────┴───────┐   ┌──────────────────┐   ┌──────────┐
//!                   │ SQLite / Qdrant│   │ QuestionAnswerer │──▶│ Citation │
//!                   └────────────────┘   │    (chat LLM)    │   │  Parser  │
//!                                        └──────────────────┘   └──────────┘
//! ```
//!
//! The runtime-free parts (fusion, rerank parsing, language detection,
//! citation parsing, history) live in `campus-assistant-core`; this crate
//! adds the HTTP providers, stores, retries and the caller surfaces.
//!
//! ## Quick Start
//!
//! ```bash
//! kic init
//! kic import ./data/chunks.jsonl
//! kic ask "Wie bekomme ich ein Zertifikat?"
//! kic serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`orchestrator`] | Chat turn pipeline and stage wiring |
//! | [`session`] | Per-session history |
//! | [`contextualizer`] | Follow-up question rewriting |
//! | [`retriever`] | Hybrid dense + sparse retrieval |
//! | [`reranker`] | LLM choice-select reranking |
//! | [`answerer`] | Grounded answer generation |
//! | [`replies`] | Fixed replies |
//! | [`llm`] | OpenAI-compatible chat model |
//! | [`embedding`] | Query embedding providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`qdrant_store`] | Qdrant vector store |
//! | [`retry`] | Timeouts and backoff |
//! | [`server`] | HTTP chat server |

pub mod answerer;
pub mod ask;
pub mod config;
pub mod contextualizer;
pub mod db;
pub mod embedding;
pub mod error;
pub mod http;
pub mod import;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod prompts;
pub mod qdrant_store;
pub mod replies;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod session;
pub mod sqlite_store;

#[cfg(test)]
mod test_support;
