//! HTTP adapters for external collaborators
//!
//! - [`HttpSentimentScorer`]: `POST {"text": ...}` → `{"score": f32, "intensity": f32}`
//! - [`WebhookDispatcher`]: `POST` of the escalated alert as JSON
//!
//! Transport failures and non-2xx statuses map to
//! `TriageError::UpstreamUnavailable` so the core can degrade.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use triage::escalation::{CrisisAlert, EmergencyDispatcher};
use triage::{SentimentScore, SentimentScorer, TriageError, TriageResult};

fn client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

async fn ensure_success(
    service: &str,
    response: reqwest::Response,
) -> TriageResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(TriageError::upstream(
        service,
        format!("HTTP {}: {}", status, body.trim()),
    ))
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f32,
    #[serde(default)]
    intensity: Option<f32>,
}

/// Sentiment scoring over HTTP
#[derive(Clone)]
pub struct HttpSentimentScorer {
    http: reqwest::Client,
    url: String,
}

impl HttpSentimentScorer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: client(timeout)?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SentimentScorer for HttpSentimentScorer {
    async fn score(&self, text: &str) -> TriageResult<SentimentScore> {
        let response = self
            .http
            .post(&self.url)
            .json(&ScoreRequest { text })
            .send()
            .await
            .map_err(|e| TriageError::upstream(self.name(), format!("request failed: {}", e)))?;
        let response = ensure_success(self.name(), response).await?;

        let body: ScoreResponse = response.json().await.map_err(|e| {
            TriageError::upstream(self.name(), format!("unreadable response: {}", e))
        })?;
        // Services that only return polarity get intensity = |score|
        let intensity = body.intensity.unwrap_or(body.score.abs());
        Ok(SentimentScore::new(body.score, intensity))
    }

    fn name(&self) -> &str {
        "http-sentiment"
    }
}

#[derive(Debug, Serialize)]
struct DispatchPayload<'a> {
    kind: &'static str,
    alert: &'a CrisisAlert,
}

/// Emergency dispatch through a webhook (paging service, on-call bridge, ...)
#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EmergencyDispatcher for WebhookDispatcher {
    async fn dispatch(&self, alert: &CrisisAlert) -> TriageResult<()> {
        debug!(alert_id = %alert.alert_id, url = %self.url, "Posting emergency webhook");
        let response = self
            .http
            .post(&self.url)
            .json(&DispatchPayload {
                kind: "crisis_escalated",
                alert,
            })
            .send()
            .await
            .map_err(|e| TriageError::upstream(self.name(), format!("request failed: {}", e)))?;
        ensure_success(self.name(), response).await?;
        info!(alert_id = %alert.alert_id, "Emergency webhook accepted");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
