//! Message Classifier
//!
//! Ranks catalog protocols for one message.
//!
//! Pure over its inputs: the same catalog, session view, message and
//! sentiment always produce the same [`ClassificationResult`].
//!
//! # Ranking
//!
//! ```text
//! candidates = protocols with >= 1 keyword found in the message
//! order by   severity DESC        (crisis protocols are exactly severity >= 4)
//!            match_count DESC
//!            catalog position ASC (stable, deterministic)
//! ```
//!
//! `risk_score = max(top.severity, risk_from_sentiment(sentiment))`

use serde::{Deserialize, Serialize};

use super::emotions::{detect_emotions, DetectedEmotion};
use super::sentiment::{risk_from_sentiment, SentimentScore};
use crate::catalog::{Protocol, ProtocolId, SharedCatalog};
use crate::resilience::DegradationLevel;
use crate::session::Session;
use crate::text::NormalizedText;

/// One protocol that matched, with its ranking keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub protocol_id: ProtocolId,
    pub severity: u8,
    pub match_count: usize,
    pub catalog_position: usize,
    pub matched_keywords: Vec<String>,
}

/// What the transport should say back, taken from the protocol or the fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePlan {
    pub response_template: String,
    pub technique: String,
    pub follow_up_prompt: String,
    pub suggested_tools: Vec<String>,
    /// Whether this is the generic supportive fallback
    pub is_fallback: bool,
}

/// Outcome of classifying one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Selected protocol, `None` when nothing matched
    pub protocol: Option<Protocol>,
    /// 0..=5
    pub risk_score: u8,
    /// Keywords of the selected protocol found in the message
    pub matched_keywords: Vec<String>,
    /// Every candidate in rank order
    pub ranked: Vec<RankedMatch>,
    /// Risk contributed by the selected protocol's severity
    pub keyword_risk: u8,
    /// Risk contributed by sentiment alone
    pub sentiment_risk: u8,
    /// Sentiment used, `None` if the scorer was unavailable
    pub sentiment: Option<SentimentScore>,
    pub detected_emotions: Vec<DetectedEmotion>,
    pub response: ResponsePlan,
    /// Times the selected technique was already used in this session
    pub technique_use_count: u32,
    pub degradation: DegradationLevel,
    pub warnings: Vec<String>,
}

impl ClassificationResult {
    pub fn protocol_id(&self) -> Option<&str> {
        self.protocol.as_ref().map(|p| p.id.as_str())
    }

    /// Whether the selected protocol is crisis-flagged
    pub fn is_crisis(&self) -> bool {
        self.protocol.as_ref().is_some_and(|p| p.is_crisis)
    }

    /// Whether this classification must open or update a crisis alert
    pub fn requires_escalation(&self, threshold: u8) -> bool {
        self.is_crisis() || self.risk_score >= threshold
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation != DegradationLevel::Full
    }

    /// Compact summary for logging
    pub fn summary(&self) -> String {
        format!(
            "protocol={} risk={} keywords={} candidates={}{}",
            self.protocol_id().unwrap_or("none"),
            self.risk_score,
            self.matched_keywords.len(),
            self.ranked.len(),
            if self.is_degraded() { " degraded" } else { "" }
        )
    }
}

/// Deterministic keyword classifier over a shared catalog
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    catalog: SharedCatalog,
}

impl MessageClassifier {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Classify a message against the catalog.
    ///
    /// `sentiment = None` means the scorer was unavailable: classification
    /// proceeds on keywords alone and the result carries a warning.
    /// Empty or whitespace-only input yields a no-match result.
    pub fn classify(
        &self,
        session: &Session,
        raw_message: &str,
        sentiment: Option<&SentimentScore>,
    ) -> ClassificationResult {
        let text = NormalizedText::new(raw_message);
        let ranked = self.rank(&text);

        let protocol = ranked
            .first()
            .and_then(|top| self.catalog.get(&top.protocol_id))
            .cloned();
        let matched_keywords = ranked
            .first()
            .map(|top| top.matched_keywords.clone())
            .unwrap_or_default();

        let keyword_risk = protocol.as_ref().map(|p| p.severity).unwrap_or(0);
        let sentiment_risk = sentiment.map(risk_from_sentiment).unwrap_or(0);
        let risk_score = keyword_risk.max(sentiment_risk);

        let (degradation, warnings) = if sentiment.is_some() {
            (DegradationLevel::Full, Vec::new())
        } else {
            (
                DegradationLevel::Partial,
                vec!["sentiment unavailable: risk derived from keyword severity only".to_string()],
            )
        };

        let response = match &protocol {
            Some(p) => ResponsePlan {
                response_template: p.response_template.clone(),
                technique: p.technique.clone(),
                follow_up_prompt: p.follow_up_prompt.clone(),
                suggested_tools: p.suggested_tools.clone(),
                is_fallback: false,
            },
            None => {
                let fallback = self.catalog.fallback();
                ResponsePlan {
                    response_template: fallback.response_template.clone(),
                    technique: fallback.technique.clone(),
                    follow_up_prompt: fallback.follow_up_prompt.clone(),
                    suggested_tools: fallback.suggested_tools.clone(),
                    is_fallback: true,
                }
            }
        };
        let technique_use_count = session.technique_count(&response.technique);

        ClassificationResult {
            protocol,
            risk_score,
            matched_keywords,
            ranked,
            keyword_risk,
            sentiment_risk,
            sentiment: sentiment.copied(),
            detected_emotions: detect_emotions(&text, sentiment),
            response,
            technique_use_count,
            degradation,
            warnings,
        }
    }

    /// All candidate protocols in rank order
    fn rank(&self, text: &NormalizedText) -> Vec<RankedMatch> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<RankedMatch> = self
            .catalog
            .protocols()
            .iter()
            .enumerate()
            .filter_map(|(position, protocol)| {
                let matched: Vec<String> = protocol
                    .keywords
                    .iter()
                    .filter(|k| text.contains_phrase(k))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                Some(RankedMatch {
                    protocol_id: protocol.id.clone(),
                    severity: protocol.severity,
                    match_count: matched.len(),
                    catalog_position: position,
                    matched_keywords: matched,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.match_count.cmp(&a.match_count))
                .then_with(|| a.catalog_position.cmp(&b.catalog_position))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, FallbackResponse, ProtocolCategory};

    fn protocol(
        id: &str,
        category: ProtocolCategory,
        severity: u8,
        keywords: &[&str],
    ) -> Protocol {
        Protocol {
            id: id.to_string(),
            category,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            severity,
            response_template: format!("{} template", id),
            technique: format!("{} technique", id),
            follow_up_prompt: "follow up".into(),
            suggested_tools: vec![],
            is_crisis: severity >= 4,
        }
    }

    fn classifier(protocols: Vec<Protocol>) -> MessageClassifier {
        MessageClassifier::new(
            Catalog::new("test", protocols, FallbackResponse::default())
                .unwrap()
                .shared(),
        )
    }

    fn session() -> Session {
        Session::new("s-1", None)
    }

    #[test]
    fn test_crisis_beats_higher_match_count() {
        let c = classifier(vec![
            protocol(
                "stress",
                ProtocolCategory::Stress,
                2,
                &["work", "deadline", "boss", "pressure"],
            ),
            protocol("crisis", ProtocolCategory::Crisis, 5, &["end it all"]),
        ]);
        let result = c.classify(
            &session(),
            "My boss, the deadline, the pressure at work... I want to end it all",
            Some(&SentimentScore::neutral()),
        );
        assert_eq!(result.protocol_id(), Some("crisis"));
        assert_eq!(result.risk_score, 5);
        assert_eq!(result.ranked.len(), 2);
        assert_eq!(result.ranked[1].match_count, 4);
    }

    #[test]
    fn test_higher_severity_wins_over_earlier_crisis_with_more_matches() {
        let c = classifier(vec![
            protocol(
                "threat",
                ProtocolCategory::Crisis,
                4,
                &["hurt someone", "lose control"],
            ),
            protocol("numb", ProtocolCategory::Crisis, 5, &["numb"]),
        ]);
        let result = c.classify(
            &session(),
            "I feel numb, I might lose control and hurt someone",
            Some(&SentimentScore::neutral()),
        );
        assert_eq!(result.protocol_id(), Some("numb"));
        assert_eq!(result.risk_score, 5);
        let order: Vec<_> = result.ranked.iter().map(|r| r.severity).collect();
        assert_eq!(order, vec![5, 4]);
    }

    #[test]
    fn test_match_count_breaks_severity_tie() {
        let c = classifier(vec![
            protocol("anger", ProtocolCategory::Anger, 2, &["angry"]),
            protocol("stress", ProtocolCategory::Stress, 2, &["stressed", "overwhelmed"]),
        ]);
        let result = c.classify(
            &session(),
            "angry, stressed and overwhelmed",
            Some(&SentimentScore::neutral()),
        );
        assert_eq!(result.protocol_id(), Some("stress"));
        assert_eq!(result.matched_keywords, vec!["stressed", "overwhelmed"]);
    }

    #[test]
    fn test_catalog_order_breaks_full_tie() {
        let c = classifier(vec![
            protocol("first", ProtocolCategory::Anxiety, 2, &["worried"]),
            protocol("second", ProtocolCategory::Stress, 2, &["tense"]),
        ]);
        let result = c.classify(&session(), "worried and tense", None);
        assert_eq!(result.protocol_id(), Some("first"));
    }

    #[test]
    fn test_empty_message_is_no_match() {
        let c = classifier(vec![protocol("a", ProtocolCategory::Anxiety, 2, &["anxious"])]);
        let result = c.classify(&session(), "   \n ", Some(&SentimentScore::neutral()));
        assert!(result.protocol.is_none());
        assert_eq!(result.risk_score, 0);
        assert!(result.response.is_fallback);
        assert!(result.detected_emotions.is_empty());
    }

    #[test]
    fn test_sentiment_raises_risk_without_keywords() {
        let c = classifier(vec![protocol("a", ProtocolCategory::Anxiety, 2, &["anxious"])]);
        let result = c.classify(
            &session(),
            "I can't see any way forward anymore",
            Some(&SentimentScore::new(-0.95, 0.9)),
        );
        assert!(result.protocol.is_none());
        assert_eq!(result.sentiment_risk, 3);
        assert_eq!(result.risk_score, 3);
    }

    #[test]
    fn test_missing_sentiment_degrades_with_warning() {
        let c = classifier(vec![protocol("a", ProtocolCategory::Anxiety, 2, &["anxious"])]);
        let result = c.classify(&session(), "so anxious", None);
        assert!(result.is_degraded());
        assert_eq!(result.risk_score, 2);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier(Catalog::builtin().unwrap().protocols().to_vec());
        let s = session();
        let sentiment = SentimentScore::new(-0.6, 0.7);
        let a = c.classify(&s, "I'm lonely, anxious and can't sleep", Some(&sentiment));
        let b = c.classify(&s, "I'm lonely, anxious and can't sleep", Some(&sentiment));
        assert_eq!(a, b);
    }

    #[test]
    fn test_technique_use_count_reads_session() {
        let c = classifier(vec![protocol("a", ProtocolCategory::Anxiety, 2, &["anxious"])]);
        let mut s = session();
        s.technique_usage_counts.insert("a technique".into(), 2);
        let result = c.classify(&s, "anxious", None);
        assert_eq!(result.technique_use_count, 2);
    }
}
