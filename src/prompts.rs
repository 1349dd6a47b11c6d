//! Prompt set used by the pipeline stages.
//!
//! The built-in prompts are compiled in from `prompts/*.txt`. When
//! `[prompts].dir` is set, a file of the same name in that directory
//! replaces the built-in text. Every template is parsed at startup, so an
//! unknown placeholder in an override fails `kic` before the first turn.
//!
//! | File | Placeholders | Used by |
//! |------|--------------|---------|
//! | `contextualize.txt` | none | Contextualizer (system) |
//! | `rerank.txt` | `{documents}`, `{query}` | Reranker (user message) |
//! | `answer_long.txt` | `{language}` | QuestionAnswerer, `large` profile |
//! | `answer_short.txt` | `{language}` | QuestionAnswerer, `small` profile |

use anyhow::{Context, Result};
use std::path::Path;

use campus_assistant_core::prompt::PromptTemplate;

const CONTEXTUALIZE: &str = include_str!("../prompts/contextualize.txt");
const RERANK: &str = include_str!("../prompts/rerank.txt");
const ANSWER_LONG: &str = include_str!("../prompts/answer_long.txt");
const ANSWER_SHORT: &str = include_str!("../prompts/answer_short.txt");

#[derive(Debug, Clone)]
pub struct PromptSet {
    pub contextualize: PromptTemplate,
    pub rerank: PromptTemplate,
    pub answer_long: PromptTemplate,
    pub answer_short: PromptTemplate,
}

impl PromptSet {
    /// The compiled-in prompts.
    pub fn builtin() -> Result<Self> {
        Self::load(None)
    }

    /// Built-in prompts, with overrides from `dir` where present.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        Ok(Self {
            contextualize: template(dir, "contextualize", CONTEXTUALIZE, &[])?,
            rerank: template(dir, "rerank", RERANK, &["documents", "query"])?,
            answer_long: template(dir, "answer_long", ANSWER_LONG, &["language"])?,
            answer_short: template(dir, "answer_short", ANSWER_SHORT, &["language"])?,
        })
    }
}

fn template(
    dir: Option<&Path>,
    name: &str,
    builtin: &str,
    placeholders: &[&str],
) -> Result<PromptTemplate> {
    let override_path = dir.map(|d| d.join(format!("{}.txt", name)));
    let source = match override_path {
        Some(path) if path.exists() => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?,
        _ => builtin.to_string(),
    };
    Ok(PromptTemplate::parse(name, source.trim(), placeholders)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_prompts_parse() {
        let prompts = PromptSet::builtin().unwrap();
        let rendered = prompts.answer_long.render_one("language", "English");
        assert!(rendered.contains("Always answer in English"));
        assert!(rendered.contains("[docN]"));
        assert!(!prompts.contextualize.render(&Default::default()).is_empty());
    }

    #[test]
    fn test_override_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("answer_short.txt"), "Kurz auf {language}.").unwrap();
        let prompts = PromptSet::load(Some(dir.path())).unwrap();
        assert_eq!(
            prompts.answer_short.render_one("language", "German"),
            "Kurz auf German."
        );
        // Files that are not overridden keep the built-in text.
        assert!(prompts
            .answer_long
            .render_one("language", "German")
            .contains("NO ANSWER FOUND"));
    }

    #[test]
    fn test_override_with_unknown_placeholder_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rerank.txt"), "{docs} {query}").unwrap();
        let err = PromptSet::load(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("docs"));
    }
}
