//! Query language detection over {German, English}.
//!
//! Scores each text by counting function words of either language, with
//! umlauts and `ß` as extra German evidence. The query alone decides when
//! the scores differ; otherwise the last three history turns are pooled
//! with it. A tie after that resolves to German, the platform default.

use crate::models::{ChatTurn, Language};
use crate::sparse::tokenize;

/// History turns consulted when the query alone is ambiguous.
pub const HISTORY_WINDOW: usize = 3;

const GERMAN_STOPWORDS: &[&str] = &[
    "aber", "alle", "als", "am", "an", "auch", "auf", "aus", "bei", "bin", "bis", "bitte", "da",
    "das", "dass", "dem", "den", "der", "des", "dich", "die", "dir", "du", "ein", "eine", "einen",
    "einem", "einer", "es", "für", "gibt", "hat", "habe", "ich", "ihr", "im", "in", "ist", "ja",
    "kann", "kannst", "kein", "keine", "mein", "meine", "mich", "mir", "mit", "nach", "nicht",
    "noch", "nur", "oder", "sich", "sie", "sind", "so", "über", "um", "und", "uns", "von", "vor",
    "was", "welche", "welcher", "wer", "werden", "wie", "wieso", "wir", "wird", "wo", "warum",
    "zu", "zum", "zur",
];

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "all", "am", "an", "and", "any", "are", "as", "at", "be", "but", "by", "can",
    "could", "do", "does", "for", "from", "has", "have", "how", "i", "if", "in", "is", "it",
    "me", "my", "no", "not", "of", "on", "or", "please", "should", "so", "that", "the", "their",
    "there", "this", "to", "was", "we", "what", "when", "where", "which", "who", "why", "will",
    "with", "would", "you", "your",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Evidence {
    german: usize,
    english: usize,
}

impl Evidence {
    fn of(text: &str) -> Self {
        let mut ev = Evidence::default();
        for token in tokenize(text) {
            // Words spelled the same in both ("in", "am", "so") count for neither.
            let de = GERMAN_STOPWORDS.contains(&token.as_str());
            let en = ENGLISH_STOPWORDS.contains(&token.as_str());
            match (de, en) {
                (true, false) => ev.german += 1,
                (false, true) => ev.english += 1,
                _ => {}
            }
            if token.chars().any(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'ß')) {
                ev.german += 1;
            }
        }
        ev
    }

    fn add(self, other: Evidence) -> Self {
        Evidence {
            german: self.german + other.german,
            english: self.english + other.english,
        }
    }

    fn verdict(&self) -> Option<Language> {
        match self.german.cmp(&self.english) {
            std::cmp::Ordering::Greater => Some(Language::German),
            std::cmp::Ordering::Less => Some(Language::English),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Classifies `query`, using `history` (oldest first) as tie-breaking evidence.
pub fn detect_language(query: &str, history: &[ChatTurn]) -> Language {
    let own = Evidence::of(query);
    if let Some(lang) = own.verdict() {
        return lang;
    }

    let pooled = history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .fold(own, |acc, turn| acc.add(Evidence::of(&turn.text)));

    pooled.verdict().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_english() {
        assert_eq!(
            detect_language("What is the difference between AI and machine learning?", &[]),
            Language::English
        );
    }

    #[test]
    fn test_detects_german() {
        assert_eq!(
            detect_language("Was ist der Unterschied zwischen KI und maschinellem Lernen?", &[]),
            Language::German
        );
    }

    #[test]
    fn test_umlauts_count_as_german() {
        assert_eq!(detect_language("Kursübersicht Prüfung", &[]), Language::German);
    }

    #[test]
    fn test_ambiguous_query_uses_history() {
        let history = vec![
            ChatTurn::user("How do I enroll in a course?"),
            ChatTurn::assistant("You can enroll from the course page."),
        ];
        assert_eq!(detect_language("Python?", &history), Language::English);
    }

    #[test]
    fn test_only_last_three_turns_are_considered() {
        let history = vec![
            ChatTurn::user("What is this about and how does it work for you?"),
            ChatTurn::assistant("Ok"),
            ChatTurn::user("Danke"),
            ChatTurn::assistant("Gerne, ich bin für dich da"),
        ];
        assert_eq!(detect_language("ok", &history), Language::German);
    }

    #[test]
    fn test_fully_ambiguous_defaults_to_german() {
        assert_eq!(detect_language("ChatGPT", &[]), Language::German);
        assert_eq!(detect_language("", &[ChatTurn::user("42")]), Language::German);
    }
}
