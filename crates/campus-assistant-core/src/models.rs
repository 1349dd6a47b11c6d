//! Core data types that flow through the answering pipeline.
//!
//! Chunks and their metadata belong to the external corpus and are only
//! read here. Everything else ([`ScoredCandidate`], [`RankedChunk`],
//! [`Answer`]) is produced and discarded within a single chat turn, except
//! [`ChatTurn`]s, which are kept in a session's
//! [`ChatHistory`](crate::history::ChatHistory).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Where a chunk was crawled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Course material from the learning management system.
    Course,
    /// Pages, blog posts and FAQs of the public website.
    Cms,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Course => "course",
            SourceType::Cms => "cms",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "course" => Ok(SourceType::Course),
            "cms" => Ok(SourceType::Cms),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// Metadata attached to every indexed chunk by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Web-browsable link to the page the chunk was cut from.
    pub url: String,
    pub title: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<i64>,
}

/// A retrievable unit of corpus text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Whether the chunk can back a citation.
    pub fn has_url(&self) -> bool {
        !self.metadata.url.trim().is_empty()
    }
}

/// A fused retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub chunk: Chunk,
    /// Normalised dense score (0.0 if the dense search did not return it).
    pub dense_score: f64,
    /// Normalised sparse score (0.0 if the sparse search did not return it).
    pub sparse_score: f64,
    pub fused_score: f64,
}

/// A candidate after reranking. `relevance_rank` starts at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub candidate: ScoredCandidate,
    pub relevance_rank: usize,
    /// Judge score, `None` when the ranking fell back to fused order.
    pub relevance_score: Option<f64>,
}

impl RankedChunk {
    pub fn chunk(&self) -> &Chunk {
        &self.candidate.chunk
    }
}

/// A resolved source reference, numbered by first use in the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub marker_index: usize,
    pub title: String,
    pub url: String,
}

/// Languages the assistant answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    German,
    English,
}

impl Language {
    /// English name, as substituted into prompt templates.
    pub fn name(&self) -> &'static str {
        match self {
            Language::German => "German",
            Language::English => "English",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::German => "de",
            Language::English => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Restricts retrieval to one course, optionally to one module of it.
///
/// An empty scope means "general platform content" (CMS pages).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub module_id: Option<i64>,
}

impl Scope {
    pub fn general() -> Self {
        Self::default()
    }

    pub fn course(course_id: i64) -> Self {
        Self {
            course_id: Some(course_id),
            module_id: None,
        }
    }

    pub fn module(course_id: i64, module_id: i64) -> Self {
        Self {
            course_id: Some(course_id),
            module_id: Some(module_id),
        }
    }

    pub fn is_course(&self) -> bool {
        self.course_id.is_some()
    }

    /// A module only makes sense inside a course.
    pub fn validate(&self) -> Result<(), String> {
        if self.module_id.is_some() && self.course_id.is_none() {
            return Err("module_id requires course_id".to_string());
        }
        Ok(())
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Generated from retrieved sources.
    Grounded,
    /// Retrieval produced nothing usable, or the model found no answer.
    InsufficientInformation,
    /// The input could not be interpreted as a question.
    NotUnderstood,
    /// An indispensable stage failed.
    CannotAnswer,
}

/// Optional stages that may fall back without failing the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Contextualize,
    Rerank,
}

/// Final result of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Answer text with citation markers replaced by links.
    pub text: String,
    pub language: Language,
    pub citations: Vec<Citation>,
    pub kind: AnswerKind,
    /// Stages that fell back during this turn.
    pub degraded: Vec<Stage>,
}

impl Answer {
    /// An answer without sources.
    pub fn plain(text: impl Into<String>, language: Language, kind: AnswerKind) -> Self {
        Self {
            text: text.into(),
            language,
            citations: Vec::new(),
            kind,
            degraded: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_parse() {
        assert_eq!("Course".parse::<SourceType>().unwrap(), SourceType::Course);
        assert_eq!("cms".parse::<SourceType>().unwrap(), SourceType::Cms);
        assert!("drupal".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_chunk_has_url() {
        let mut chunk = Chunk {
            id: "c1".to_string(),
            text: "text".to_string(),
            metadata: ChunkMetadata {
                url: "https://x/1".to_string(),
                title: "One".to_string(),
                source_type: SourceType::Cms,
                course_id: None,
                module_id: None,
            },
        };
        assert!(chunk.has_url());
        chunk.metadata.url = "   ".to_string();
        assert!(!chunk.has_url());
    }

    #[test]
    fn test_scope_validation() {
        assert!(Scope::general().validate().is_ok());
        assert!(Scope::module(3, 7).validate().is_ok());
        let orphan = Scope {
            course_id: None,
            module_id: Some(7),
        };
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatTurn::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","text":"hi"}"#);
    }
}
