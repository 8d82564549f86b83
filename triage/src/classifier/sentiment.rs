//! Sentiment scoring contract and the sentiment → risk mapping.
//!
//! The scorer is an external collaborator treated as a black box. The core
//! only consumes its `{score, intensity}` output. [`LexiconSentimentScorer`]
//! is a small offline scorer for deployments without a scoring service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TriageResult;
use crate::text::NormalizedText;

/// Highest risk sentiment alone can contribute
pub const MAX_SENTIMENT_RISK: u8 = 3;

/// Polarity and strength of a message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// Polarity in -1.0 (very negative) ..= 1.0 (very positive)
    pub score: f32,
    /// Strength in 0.0 ..= 1.0
    pub intensity: f32,
}

impl SentimentScore {
    /// Create a score, clamping both values into range. NaN reads as neutral.
    pub fn new(score: f32, intensity: f32) -> Self {
        let clamp = |v: f32, lo: f32, hi: f32| if v.is_nan() { 0.0 } else { v.clamp(lo, hi) };
        Self {
            score: clamp(score, -1.0, 1.0),
            intensity: clamp(intensity, 0.0, 1.0),
        }
    }

    pub fn neutral() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_negative(&self) -> bool {
        self.score < 0.0
    }
}

/// Map sentiment to a baseline risk (0..=3).
///
/// Strongly negative, intense messages reach 3 without any keyword match so
/// that crisis language missing from the catalog still raises the level.
pub fn risk_from_sentiment(sentiment: &SentimentScore) -> u8 {
    let s = SentimentScore::new(sentiment.score, sentiment.intensity);
    if s.score <= -0.7 && s.intensity >= 0.7 {
        MAX_SENTIMENT_RISK
    } else if s.score <= -0.4 && s.intensity >= 0.5 {
        2
    } else if s.score <= -0.2 {
        1
    } else {
        0
    }
}

/// External sentiment scorer
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    /// Score a raw message
    async fn score(&self, text: &str) -> TriageResult<SentimentScore>;

    /// Name used in logs and degradation warnings
    fn name(&self) -> &str {
        "sentiment"
    }
}

const NEGATIVE_WORDS: &[&str] = &[
    "sad", "hopeless", "worthless", "alone", "lonely", "hate", "die", "dead", "kill", "hurt",
    "pain", "cry", "crying", "scared", "afraid", "anxious", "worried", "angry", "furious",
    "tired", "exhausted", "empty", "numb", "miserable", "awful", "terrible", "broken", "lost",
    "useless", "stressed", "overwhelmed", "panic", "depressed", "suicide", "suicidal",
];

const POSITIVE_WORDS: &[&str] = &[
    "happy", "glad", "good", "great", "better", "calm", "relaxed", "grateful", "hopeful",
    "proud", "excited", "love", "peaceful", "okay", "fine", "safe", "thankful", "joy",
];

const INTENSIFIERS: &[&str] = &[
    "very", "so", "really", "extremely", "completely", "totally", "always", "never",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "don't", "can't", "isn't", "wasn't"];

/// Word-list scorer used when no scoring service is configured
#[derive(Debug, Clone, Default)]
pub struct LexiconSentimentScorer;

impl LexiconSentimentScorer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scoring, deterministic for a given text
    pub fn score_text(&self, text: &str) -> SentimentScore {
        let normalized = NormalizedText::new(text);
        let words: Vec<&str> = normalized.words().collect();
        if words.is_empty() {
            return SentimentScore::neutral();
        }

        let mut positive = 0.0f32;
        let mut negative = 0.0f32;
        let mut intensifiers = 0u32;

        for (i, word) in words.iter().enumerate() {
            if INTENSIFIERS.contains(word) {
                intensifiers += 1;
                continue;
            }
            let negated = i > 0 && NEGATIONS.contains(&words[i - 1]);
            if NEGATIVE_WORDS.contains(word) {
                if negated {
                    positive += 0.5;
                } else {
                    negative += 1.0;
                }
            } else if POSITIVE_WORDS.contains(word) {
                if negated {
                    negative += 1.0;
                } else {
                    positive += 1.0;
                }
            }
        }

        let hits = positive + negative;
        if hits == 0.0 {
            return SentimentScore::neutral();
        }

        let score = (positive - negative) / hits;
        let intensity = (hits / 3.0) + 0.15 * intensifiers as f32;
        SentimentScore::new(score, intensity)
    }
}

#[async_trait]
impl SentimentScorer for LexiconSentimentScorer {
    async fn score(&self, text: &str) -> TriageResult<SentimentScore> {
        Ok(self.score_text(text))
    }

    fn name(&self) -> &str {
        "lexicon"
    }
}
