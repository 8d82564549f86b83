//! Lexicon-based emotion detection for turn records.

use serde::{Deserialize, Serialize};

use super::sentiment::SentimentScore;
use crate::text::NormalizedText;

/// An emotion detected in one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEmotion {
    pub emotion: String,
    /// 0.0 ..= 1.0
    pub intensity: f32,
}

/// Cue phrases per emotion label, in reporting order
const EMOTION_CUES: &[(&str, &[&str])] = &[
    (
        "hopelessness",
        &["hopeless", "worthless", "no point", "pointless", "give up", "want to die"],
    ),
    ("sadness", &["sad", "crying", "depressed", "feeling down", "grief", "heartbroken"]),
    ("anxiety", &["anxious", "anxiety", "worried", "nervous", "panic", "on edge"]),
    ("fear", &["scared", "afraid", "terrified", "frightened"]),
    ("anger", &["angry", "furious", "rage", "mad", "irritated", "frustrated"]),
    ("loneliness", &["lonely", "alone", "isolated", "nobody cares"]),
    ("shame", &["ashamed", "guilty", "embarrassed", "i'm stupid"]),
    ("exhaustion", &["tired", "exhausted", "drained", "burned out", "burnout"]),
    ("joy", &["happy", "glad", "excited", "grateful", "proud"]),
    ("calm", &["calm", "relaxed", "peaceful", "feeling better"]),
];

const BASE_INTENSITY: f32 = 0.4;
const PER_EXTRA_CUE: f32 = 0.15;

/// Detect emotions in a normalized message.
///
/// Intensity starts at a base value, grows with additional cues for the same
/// emotion, and is lifted to the sentiment intensity when that is higher.
pub fn detect_emotions(
    text: &NormalizedText,
    sentiment: Option<&SentimentScore>,
) -> Vec<DetectedEmotion> {
    if text.is_empty() {
        return Vec::new();
    }
    let sentiment_intensity = sentiment.map(|s| s.intensity).unwrap_or(0.0);

    EMOTION_CUES
        .iter()
        .filter_map(|(emotion, cues)| {
            let hits = cues.iter().filter(|cue| text.contains_phrase(cue)).count();
            if hits == 0 {
                return None;
            }
            let lexical = BASE_INTENSITY + PER_EXTRA_CUE * (hits - 1) as f32;
            Some(DetectedEmotion {
                emotion: (*emotion).to_string(),
                intensity: lexical.max(sentiment_intensity).min(1.0),
            })
        })
        .collect()
}
