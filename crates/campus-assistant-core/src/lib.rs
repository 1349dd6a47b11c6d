//! # Campus Assistant Core
//!
//! Runtime-free logic of the Campus Assistant: data model, chat history,
//! the store / embedder / chat-model traits, the in-memory store, sparse
//! query encoding, hybrid fusion, rerank-judgment parsing, language
//! detection, prompt templates and citation parsing.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. Network
//! adapters and the async pipeline live in the `campus-assistant` crate.

pub mod citation;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod history;
pub mod language;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod rerank;
pub mod sparse;
pub mod store;
