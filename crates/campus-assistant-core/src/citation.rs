//! Resolution of `[docN]` markers into source links.
//!
//! The answer model refers to the sources it was given as `[doc1]`,
//! `[doc2]`, ... in prompt order. [`CitationParser::parse`] walks the
//! markers in text order and:
//!
//! - replaces a marker whose `N` names a supplied source by a link,
//!   numbering sources by first use (a chunk id or url already cited reuses
//!   its number);
//! - removes a marker whose `N` is out of range, together with the
//!   whitespace in front of it;
//! - strips markers that are not `[doc<digits>]` at all (`[doc1.2]`,
//!   `[docabc]`, `[doc1a]`).
//!
//! Parsing never fails, and its output contains no markers, so running it
//! twice is the same as running it once.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::{Citation, RankedChunk};

/// How a resolved marker is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStyle {
    /// `[[1]](https://...)`
    #[default]
    Markdown,
    /// `<a href="https://..."><sup>[1]</sup></a>`
    Html,
}

impl LinkStyle {
    pub fn render(&self, index: usize, url: &str) -> String {
        let url = escape_link_url(url);
        match self {
            LinkStyle::Markdown => format!("[[{}]]({})", index, url),
            LinkStyle::Html => format!("<a href=\"{}\"><sup>[{}]</sup></a>", url, index),
        }
    }
}

/// Percent-encodes the characters that end a Markdown link target or an
/// HTML attribute early.
fn escape_link_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for c in url.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '"' => out.push_str("%22"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            _ => out.push(c),
        }
    }
    out
}

/// Answer text with markers resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Default)]
pub struct CitationParser {
    style: LinkStyle,
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[doc([^\[\]\s]*)\]").expect("marker pattern is valid"))
}

impl CitationParser {
    pub fn new(style: LinkStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> LinkStyle {
        self.style
    }

    /// Resolves markers in `raw` against `sources` (marker `N` is `sources[N - 1]`).
    pub fn parse(&self, raw: &str, sources: &[RankedChunk]) -> ParsedAnswer {
        let mut text = String::with_capacity(raw.len());
        let mut citations: Vec<Citation> = Vec::new();
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        let mut by_url: HashMap<&str, usize> = HashMap::new();
        let mut last = 0;

        for caps in marker_re().captures_iter(raw) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            text.push_str(&raw[last..whole.start()]);
            last = whole.end();

            let inner = inner.as_str();
            if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
                // Malformed marker.
                continue;
            }

            let source = inner
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .and_then(|n| sources.get(n - 1));

            let Some(source) = source else {
                let kept = text.trim_end_matches([' ', '\t']).len();
                text.truncate(kept);
                continue;
            };

            let chunk = source.chunk();
            let url = chunk.metadata.url.trim();
            let index = match by_id
                .get(chunk.id.as_str())
                .or_else(|| by_url.get(url))
                .copied()
            {
                Some(index) => index,
                None => {
                    let index = citations.len() + 1;
                    let title = chunk.metadata.title.trim();
                    citations.push(Citation {
                        marker_index: index,
                        title: (if title.is_empty() { url } else { title }).to_string(),
                        url: url.to_string(),
                    });
                    index
                }
            };
            by_id.insert(chunk.id.as_str(), index);
            by_url.insert(url, index);

            text.push_str(&self.style.render(index, url));
        }
        text.push_str(&raw[last..]);

        ParsedAnswer {
            text: collapse_double_spaces(&text),
            citations,
        }
    }
}

fn collapse_double_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c == ' ' && prev_space {
            continue;
        }
        prev_space = c == ' ';
        out.push(c);
    }
    out
}
