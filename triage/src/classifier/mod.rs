//! Message classification: keyword ranking, sentiment risk, emotions.

pub mod emotions;
pub mod engine;
pub mod sentiment;

pub use emotions::{detect_emotions, DetectedEmotion};
pub use engine::{ClassificationResult, MessageClassifier, RankedMatch, ResponsePlan};
pub use sentiment::{
    risk_from_sentiment, LexiconSentimentScorer, SentimentScore, SentimentScorer,
    MAX_SENTIMENT_RISK,
};
