//! Prompt templates with named placeholders.
//!
//! Templates are plain text with `{name}` placeholders. `{{` and `}}`
//! render as literal braces, which keeps JSON examples inside a prompt
//! readable. Placeholders are checked when the template is created, so a
//! typo in a template file fails at startup instead of mid-conversation.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template '{template}' uses unknown placeholder '{{{name}}}'")]
    UnknownPlaceholder { template: String, name: String },

    #[error("template '{template}' has an unterminated placeholder")]
    Unterminated { template: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `source`, allowing only the placeholders in `allowed`.
    pub fn parse(name: &str, source: &str, allowed: &[&str]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut var = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => var.push(ch),
                            None => {
                                return Err(TemplateError::Unterminated {
                                    template: name.to_string(),
                                })
                            }
                        }
                    }
                    if !allowed.contains(&var.as_str()) {
                        return Err(TemplateError::UnknownPlaceholder {
                            template: name.to_string(),
                            name: var,
                        });
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(var));
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Substitutes placeholders. Missing values render as empty strings.
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Var(v) => {
                    if let Some(val) = values.get(v.as_str()) {
                        out.push_str(val);
                    }
                }
            }
        }
        out
    }

    /// Convenience for templates with a single placeholder.
    pub fn render_one(&self, key: &str, value: impl Into<String>) -> String {
        let values = HashMap::from([(key, value.into())]);
        self.render(&values)
    }
}

/// Cuts `text` to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
