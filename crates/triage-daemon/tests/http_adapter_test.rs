//! Integration tests for the HTTP collaborators
//!
//! A one-shot TCP stub plays the remote service so the tests stay offline.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use triage::escalation::{CrisisAlert, EmergencyDispatcher};
use triage::{DegradationLevel, SentimentScorer, TriageConfig, TriageError, TriageService};
use triage_daemon::{HttpSentimentScorer, WebhookDispatcher};

/// Serve one canned response and hand back the raw request
async fn stub_server(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });
    (url, handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(split) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..split]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= split + 4 + length
}

/// Address nothing listens on
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    drop(listener);
    url
}

fn alert() -> CrisisAlert {
    CrisisAlert::new("s-1", None, 5, "I want to kill myself", Vec::new())
}

/// Test: the scorer posts the text and parses score/intensity
#[tokio::test]
async fn test_sentiment_scorer_parses_response() {
    let (url, server) = stub_server("200 OK", r#"{"score": -0.8, "intensity": 0.7}"#).await;
    let scorer = HttpSentimentScorer::new(url, Duration::from_secs(5)).unwrap();

    let score = scorer.score("I feel awful").await.unwrap();

    assert!((score.score + 0.8).abs() < 1e-6);
    assert!((score.intensity - 0.7).abs() < 1e-6);
    let request = server.await.unwrap();
    assert!(request.starts_with("POST / HTTP/1.1"));
    assert!(request.contains(r#"{"text":"I feel awful"}"#));
}

/// Test: a non-2xx status is an upstream failure carrying the status
#[tokio::test]
async fn test_sentiment_scorer_maps_server_error() {
    let (url, _server) = stub_server("503 Service Unavailable", r#"{"error": "overloaded"}"#).await;
    let scorer = HttpSentimentScorer::new(url, Duration::from_secs(5)).unwrap();

    let err = scorer.score("hello").await.unwrap_err();
    match err {
        TriageError::UpstreamUnavailable { service, message } => {
            assert_eq!(service, "http-sentiment");
            assert!(message.contains("503"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Test: an unreachable scorer degrades the turn but keyword risk still escalates
#[tokio::test]
async fn test_unreachable_scorer_degrades_turn() {
    let scorer = HttpSentimentScorer::new(closed_url().await, Duration::from_secs(2)).unwrap();
    let service = TriageService::builder(TriageConfig::default())
        .sentiment(Arc::new(scorer))
        .build()
        .unwrap();

    let outcome = service
        .handle_message("s-1", None, "I want to kill myself")
        .await
        .unwrap();

    assert_eq!(outcome.degradation, DegradationLevel::Partial);
    assert!(outcome.warnings.iter().any(|w| w.contains("http-sentiment")));
    assert_eq!(outcome.risk_level, 5);
    assert!(outcome.alert.is_some());
}

/// Test: the webhook receives the alert payload
#[tokio::test]
async fn test_webhook_posts_alert() {
    let (url, server) = stub_server("202 Accepted", "{}").await;
    let dispatcher = WebhookDispatcher::new(url, Duration::from_secs(5)).unwrap();
    let alert = alert();

    dispatcher.dispatch(&alert).await.unwrap();

    let request = server.await.unwrap();
    assert!(request.contains("\"kind\":\"crisis_escalated\""));
    assert!(request.contains(&alert.alert_id));
}

/// Test: webhook failure is reported as upstream unavailable
#[tokio::test]
async fn test_webhook_failure_is_upstream_error() {
    let dispatcher = WebhookDispatcher::new(closed_url().await, Duration::from_secs(2)).unwrap();

    let err = dispatcher.dispatch(&alert()).await.unwrap_err();
    assert!(matches!(err, TriageError::UpstreamUnavailable { .. }));
    assert!(!err.is_fatal());
}
