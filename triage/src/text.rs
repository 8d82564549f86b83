//! Message normalization shared by the catalog and the classifier.

use regex::Regex;
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}']+").expect("NON_WORD regex should compile"));

/// Lowercase, fold typographic apostrophes, and collapse every run of
/// punctuation or whitespace into a single space.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A normalized message prepared for phrase lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    normalized: String,
    padded: String,
}

impl NormalizedText {
    pub fn new(raw: &str) -> Self {
        let normalized = normalize(raw);
        let padded = format!(" {} ", normalized);
        Self { normalized, padded }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Whether an already-normalized phrase occurs starting at a word
    /// boundary. "hurt" matches "hurting" but "die" does not match "studied".
    pub fn contains_phrase(&self, phrase: &str) -> bool {
        if phrase.is_empty() {
            return false;
        }
        self.padded.contains(&format!(" {}", phrase))
    }

    /// Individual words of the message
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.normalized.split(' ').filter(|w| !w.is_empty())
    }
}
