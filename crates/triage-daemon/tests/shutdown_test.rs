//! Integration tests for daemon shutdown with alerts still open
//!
//! Paused clock: input closes a few seconds after a crisis turn and the
//! acknowledgement window must still run its full course.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use triage::escalation::{AlertStatus, CrisisAlert, EmergencyDispatcher};
use triage::{TriageConfig, TriageResult, TriageService};
use triage_daemon::{await_open_alerts, run};

#[derive(Default)]
struct CountingDispatcher {
    alerts: Mutex<Vec<String>>,
}

impl CountingDispatcher {
    fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl EmergencyDispatcher for CountingDispatcher {
    async fn dispatch(&self, alert: &CrisisAlert) -> TriageResult<()> {
        self.alerts.lock().unwrap().push(alert.alert_id.clone());
        Ok(())
    }
}

fn service(dispatcher: Arc<CountingDispatcher>) -> Arc<TriageService> {
    TriageService::builder(TriageConfig::default())
        .dispatcher(dispatcher)
        .build()
        .unwrap()
}

const CRISIS_LINE: &str = r#"{"id": 1, "component": "session", "command": {"op": "handle_message", "session_id": "s-1", "message": "I want to kill myself"}}"#;

/// Test: input closing 5 s after a crisis turn waits out the full window
/// before the single emergency dispatch
#[tokio::test(start_paused = true)]
async fn test_eof_does_not_dispatch_before_ack_timeout() {
    let dispatcher = Arc::new(CountingDispatcher::default());
    let service = service(Arc::clone(&dispatcher));
    let start = Instant::now();

    let summary = run(Arc::clone(&service), CRISIS_LINE.as_bytes(), tokio::io::sink(), false)
        .await
        .unwrap();
    assert_eq!(summary.requests, 1);
    let alert_id = service.list_active_alerts()[0].alert_id.clone();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let waiter = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { await_open_alerts(&service).await })
    };

    tokio::time::sleep(Duration::from_secs(55)).await;
    assert!(!waiter.is_finished());
    assert_eq!(dispatcher.count(), 0);
    assert_eq!(
        service.get_alert(&alert_id).unwrap().status,
        AlertStatus::Active
    );

    waiter.await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert_eq!(dispatcher.count(), 1);
    assert_eq!(
        service.get_alert(&alert_id).unwrap().status,
        AlertStatus::Escalated
    );
}

/// Test: an alert acknowledged during the wait ends it without dispatch
#[tokio::test(start_paused = true)]
async fn test_acknowledged_alert_releases_shutdown() {
    let dispatcher = Arc::new(CountingDispatcher::default());
    let service = service(Arc::clone(&dispatcher));

    run(Arc::clone(&service), CRISIS_LINE.as_bytes(), tokio::io::sink(), false)
        .await
        .unwrap();
    let alert_id = service.list_active_alerts()[0].alert_id.clone();

    let waiter = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { await_open_alerts(&service).await })
    };
    tokio::time::sleep(Duration::from_secs(30)).await;
    service
        .acknowledge_crisis_alert(&alert_id, "r-1")
        .await
        .unwrap();

    let started = Instant::now();
    waiter.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(90));
    assert_eq!(dispatcher.count(), 0);
}

/// Test: nothing open means nothing to wait for
#[tokio::test(start_paused = true)]
async fn test_no_open_alerts_returns_immediately() {
    let service = service(Arc::new(CountingDispatcher::default()));
    let start = Instant::now();
    await_open_alerts(&service).await;
    assert_eq!(start.elapsed(), Duration::ZERO);
}
