//! Crisis Escalation Engine
//!
//! Owns every [`CrisisAlert`] and its countdown. Per session at most one
//! alert is active; further high-risk turns are folded into it.
//!
//! The countdown is a spawned task racing `sleep(ack_timeout)` against a
//! [`CancellationToken`]. Cancelling is only an optimisation: the timer path
//! goes through the same compare-and-set as acknowledgement, so a timer
//! that fires after resolution is a no-op and emergency dispatch runs at
//! most once.
//!
//! Countdowns are spawned on a [`TaskTracker`] so a host shutting down can
//! wait for every armed countdown to resolve or fire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::dispatch::{LoggingDispatcher, SharedDispatcher};
use super::state::{AlertId, AlertStatus, CrisisAlert, Indicator, Resolution, Transition};
use crate::archive::{archive_or_warn, ArchiveRecord, NullArchive, SharedArchive};
use crate::classifier::ClassificationResult;
use crate::error::{TriageError, TriageResult};
use crate::events::{SharedNotificationBus, TriageEvent};
use crate::session::{SessionId, UserId};

/// Characters of the source message carried in notifications
const PREVIEW_CHARS: usize = 80;

/// A high-risk turn that must open or update an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisSignal {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub severity: u8,
    pub source_message: String,
    pub indicators: Vec<Indicator>,
}

impl CrisisSignal {
    /// Collect the evidence from a classification
    pub fn from_classification(
        session_id: &str,
        user_id: Option<UserId>,
        raw_message: &str,
        result: &ClassificationResult,
    ) -> Self {
        let mut indicators: Vec<Indicator> = result
            .matched_keywords
            .iter()
            .map(|k| Indicator::new("keyword", k.clone()))
            .collect();
        if let Some(protocol) = &result.protocol {
            indicators.push(Indicator::new("protocol", protocol.id.clone()));
            indicators.push(Indicator::new("category", protocol.category.to_string()));
        }
        if result.sentiment_risk > 0 && result.sentiment_risk >= result.keyword_risk {
            if let Some(s) = &result.sentiment {
                indicators.push(Indicator::new(
                    "sentiment",
                    format!("score {:.2} intensity {:.2}", s.score, s.intensity),
                ));
            }
        }

        let severity = result
            .risk_score
            .max(result.protocol.as_ref().map(|p| p.severity).unwrap_or(0));

        Self {
            session_id: session_id.to_string(),
            user_id,
            severity,
            source_message: raw_message.to_string(),
            indicators,
        }
    }
}

/// What `raise` did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "alert", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// A new alert opened and its countdown armed
    Opened(CrisisAlert),
    /// Folded into the session's active alert, raising severity or evidence
    Updated(CrisisAlert),
    /// Folded in, nothing new
    Unchanged(CrisisAlert),
}

impl AlertOutcome {
    pub fn alert(&self) -> &CrisisAlert {
        match self {
            Self::Opened(a) | Self::Updated(a) | Self::Unchanged(a) => a,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Opened(_))
    }
}

/// Alert after a transition attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub alert: CrisisAlert,
    pub transition: Transition,
}

impl TransitionOutcome {
    pub fn applied(&self) -> bool {
        self.transition.applied()
    }
}

struct AlertSlot {
    alert: Mutex<CrisisAlert>,
    cancel: CancellationToken,
}

impl AlertSlot {
    fn snapshot(&self) -> CrisisAlert {
        self.alert.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Default)]
struct Registry {
    alerts: HashMap<AlertId, Arc<AlertSlot>>,
    active_by_session: HashMap<SessionId, AlertId>,
}

/// Crisis alert state machines plus their countdowns
pub struct CrisisEscalationEngine {
    registry: Mutex<Registry>,
    bus: SharedNotificationBus,
    dispatcher: SharedDispatcher,
    archive: SharedArchive,
    ack_timeout: Duration,
    countdowns: TaskTracker,
}

impl CrisisEscalationEngine {
    pub fn new(
        bus: SharedNotificationBus,
        dispatcher: SharedDispatcher,
        archive: SharedArchive,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            bus,
            dispatcher,
            archive,
            ack_timeout,
            countdowns: TaskTracker::new(),
        }
    }

    /// Engine that only logs escalations and archives nothing
    pub fn with_defaults(bus: SharedNotificationBus, ack_timeout: Duration) -> Self {
        Self::new(
            bus,
            Arc::new(LoggingDispatcher),
            Arc::new(NullArchive),
            ack_timeout,
        )
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, alert_id: &str) -> TriageResult<Arc<AlertSlot>> {
        self.registry()
            .alerts
            .get(alert_id)
            .cloned()
            .ok_or_else(|| TriageError::not_found("alert", alert_id))
    }

    /// Open an alert for the session, or fold the signal into its active one.
    ///
    /// Fails with the fatal [`TriageError::TimerUnavailable`] when called
    /// outside a tokio runtime; no alert is recorded in that case.
    pub fn raise(self: &Arc<Self>, signal: CrisisSignal) -> TriageResult<AlertOutcome> {
        if signal.session_id.trim().is_empty() {
            return Err(TriageError::validation("session_id must not be empty"));
        }

        let mut registry = self.registry();

        if let Some(slot) = registry
            .active_by_session
            .get(&signal.session_id)
            .and_then(|id| registry.alerts.get(id))
            .cloned()
        {
            let mut alert = slot.alert.lock().unwrap_or_else(|e| e.into_inner());
            // An alert that just escalated may still be mapped; open a fresh one then
            if alert.status == AlertStatus::Active {
                let changed = alert.merge(signal.severity, signal.indicators.clone());
                let snapshot = alert.clone();
                drop(alert);
                drop(registry);

                if !changed {
                    return Ok(AlertOutcome::Unchanged(snapshot));
                }
                debug!(
                    alert_id = %snapshot.alert_id,
                    severity = snapshot.severity,
                    "Crisis alert updated"
                );
                self.bus.publish(TriageEvent::AlertUpdated {
                    alert_id: snapshot.alert_id.clone(),
                    session_id: snapshot.session_id.clone(),
                    severity: snapshot.severity,
                    indicators: snapshot.indicators.clone(),
                    timestamp: snapshot.updated_at,
                });
                return Ok(AlertOutcome::Updated(snapshot));
            }
        }

        let alert = CrisisAlert::new(
            signal.session_id,
            signal.user_id,
            signal.severity,
            signal.source_message,
            signal.indicators,
        );
        let handle = Handle::try_current().map_err(|e| TriageError::TimerUnavailable {
            alert_id: alert.alert_id.clone(),
            message: e.to_string(),
        })?;

        let slot = Arc::new(AlertSlot {
            alert: Mutex::new(alert.clone()),
            cancel: CancellationToken::new(),
        });
        registry
            .alerts
            .insert(alert.alert_id.clone(), Arc::clone(&slot));
        registry
            .active_by_session
            .insert(alert.session_id.clone(), alert.alert_id.clone());
        drop(registry);

        self.arm_countdown(&handle, &alert.alert_id, slot.cancel.clone());

        info!(
            alert_id = %alert.alert_id,
            session_id = %alert.session_id,
            severity = alert.severity,
            timeout_secs = self.ack_timeout.as_secs(),
            "Crisis alert opened"
        );
        self.bus.publish(TriageEvent::AlertOpened {
            alert_id: alert.alert_id.clone(),
            session_id: alert.session_id.clone(),
            severity: alert.severity,
            indicators: alert.indicators.clone(),
            source_preview: alert.source_message.chars().take(PREVIEW_CHARS).collect(),
            timestamp: alert.opened_at,
        });

        Ok(AlertOutcome::Opened(alert))
    }

    fn arm_countdown(self: &Arc<Self>, handle: &Handle, alert_id: &str, cancel: CancellationToken) {
        let engine = Arc::clone(self);
        let alert_id = alert_id.to_string();
        let timeout = self.ack_timeout;
        self.countdowns.spawn_on(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(alert_id = %alert_id, "Countdown cancelled");
                }
                _ = tokio::time::sleep(timeout) => {
                    if let Err(e) = engine.expire(&alert_id).await {
                        warn!(alert_id = %alert_id, error = %e, "Countdown fired for unknown alert");
                    }
                }
            }
        }, handle);
    }

    /// Number of countdowns still armed or mid-escalation
    pub fn pending_countdowns(&self) -> usize {
        self.countdowns.len()
    }

    /// Wait until every armed countdown has been cancelled or has finished
    /// escalating, dispatch included. Countdowns armed while waiting are
    /// waited for too.
    pub async fn wait_for_countdowns(&self) {
        self.countdowns.close();
        self.countdowns.wait().await;
        self.countdowns.reopen();
    }

    /// Responder acknowledgement. Idempotent; late acks on escalated alerts
    /// are recorded without changing status.
    pub async fn acknowledge(
        &self,
        alert_id: &str,
        responder_id: &str,
    ) -> TriageResult<TransitionOutcome> {
        if responder_id.trim().is_empty() {
            return Err(TriageError::validation("responder_id must not be empty"));
        }
        let outcome = self.transition(alert_id, |a| a.acknowledge(responder_id))?;

        if outcome.applied() {
            info!(alert_id, responder_id, "Crisis alert acknowledged");
            self.after_resolution(&outcome.alert).await;
        } else if outcome.alert.status == AlertStatus::Escalated {
            warn!(alert_id, responder_id, "Late acknowledgement after escalation recorded");
        } else {
            debug!(alert_id, status = %outcome.alert.status, "Acknowledgement was a no-op");
        }
        Ok(outcome)
    }

    /// The user signalled they are safe
    pub async fn stand_down(&self, alert_id: &str) -> TriageResult<TransitionOutcome> {
        let outcome = self.transition(alert_id, CrisisAlert::stand_down)?;
        if outcome.applied() {
            info!(alert_id, "Crisis alert stood down by user");
            self.after_resolution(&outcome.alert).await;
        }
        Ok(outcome)
    }

    /// Stand down whatever alert is active for a session
    pub async fn stand_down_session(
        &self,
        session_id: &str,
    ) -> TriageResult<Option<TransitionOutcome>> {
        let active = self.registry().active_by_session.get(session_id).cloned();
        match active {
            Some(alert_id) => self.stand_down(&alert_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Escalate an alert whose countdown elapsed. Emergency dispatch runs
    /// only when this call performs the transition.
    pub async fn expire(&self, alert_id: &str) -> TriageResult<TransitionOutcome> {
        let outcome = self.transition(alert_id, CrisisAlert::escalate)?;
        if !outcome.applied() {
            debug!(alert_id, status = %outcome.alert.status, "Countdown lost the race");
            return Ok(outcome);
        }

        let alert = &outcome.alert;
        self.clear_active(alert);
        error!(
            alert_id = %alert.alert_id,
            session_id = %alert.session_id,
            severity = alert.severity,
            "Crisis alert escalated: no acknowledgement within timeout"
        );
        self.bus.publish(TriageEvent::AlertEscalated {
            alert_id: alert.alert_id.clone(),
            session_id: alert.session_id.clone(),
            severity: alert.severity,
            timestamp: alert.updated_at,
        });

        if let Err(e) = self.dispatcher.dispatch(alert).await {
            error!(
                alert_id = %alert.alert_id,
                dispatcher = self.dispatcher.name(),
                error = %e,
                "Emergency dispatch failed"
            );
            self.bus.publish(TriageEvent::EmergencyDispatchFailed {
                alert_id: alert.alert_id.clone(),
                session_id: alert.session_id.clone(),
                severity: alert.severity,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        }

        archive_or_warn(self.archive.as_ref(), ArchiveRecord::Alert(alert.clone())).await;
        Ok(outcome)
    }

    fn transition(
        &self,
        alert_id: &str,
        apply: impl FnOnce(&mut CrisisAlert) -> Transition,
    ) -> TriageResult<TransitionOutcome> {
        let slot = self.slot(alert_id)?;
        let mut alert = slot.alert.lock().unwrap_or_else(|e| e.into_inner());
        let transition = apply(&mut alert);
        if transition.applied() && alert.status == AlertStatus::Resolved {
            slot.cancel.cancel();
        }
        Ok(TransitionOutcome {
            alert: alert.clone(),
            transition,
        })
    }

    fn clear_active(&self, alert: &CrisisAlert) {
        let mut registry = self.registry();
        if registry.active_by_session.get(&alert.session_id) == Some(&alert.alert_id) {
            registry.active_by_session.remove(&alert.session_id);
        }
    }

    async fn after_resolution(&self, alert: &CrisisAlert) {
        self.clear_active(alert);
        self.bus.publish(TriageEvent::AlertResolved {
            alert_id: alert.alert_id.clone(),
            session_id: alert.session_id.clone(),
            severity: alert.severity,
            resolution: alert.resolution.unwrap_or(Resolution::Acknowledged),
            acknowledged_by: alert.acknowledged_by.clone(),
            timestamp: alert.updated_at,
        });
        archive_or_warn(self.archive.as_ref(), ArchiveRecord::Alert(alert.clone())).await;
    }

    pub fn get(&self, alert_id: &str) -> Option<CrisisAlert> {
        self.registry()
            .alerts
            .get(alert_id)
            .map(|slot| slot.snapshot())
    }

    /// The session's active alert, if any
    pub fn active_for_session(&self, session_id: &str) -> Option<CrisisAlert> {
        let registry = self.registry();
        registry
            .active_by_session
            .get(session_id)
            .and_then(|id| registry.alerts.get(id))
            .map(|slot| slot.snapshot())
            .filter(|alert| alert.status == AlertStatus::Active)
    }

    /// Active alerts, oldest first
    pub fn list_active(&self) -> Vec<CrisisAlert> {
        let slots: Vec<Arc<AlertSlot>> = self.registry().alerts.values().cloned().collect();
        let mut active: Vec<CrisisAlert> = slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|alert| alert.status == AlertStatus::Active)
            .collect();
        active.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        active
    }

    /// Forget terminal alerts closed before `cutoff`; they are already archived
    pub fn prune_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut registry = self.registry();
        let before = registry.alerts.len();
        registry.alerts.retain(|_, slot| {
            let alert = slot.alert.lock().unwrap_or_else(|e| e.into_inner());
            !matches!(alert.closed_at(), Some(closed) if closed < cutoff)
        });
        before - registry.alerts.len()
    }

    pub fn alert_count(&self) -> usize {
        self.registry().alerts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::escalation::dispatch::EmergencyDispatcher;
    use crate::events::NotificationBus;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EmergencyDispatcher for RecordingDispatcher {
        async fn dispatch(&self, alert: &CrisisAlert) -> TriageResult<()> {
            self.dispatched.lock().unwrap().push(alert.alert_id.clone());
            if self.fail {
                return Err(TriageError::upstream("emergency", "line busy"));
            }
            Ok(())
        }
    }

    fn signal(session: &str, severity: u8, keyword: &str) -> CrisisSignal {
        CrisisSignal {
            session_id: session.into(),
            user_id: None,
            severity,
            source_message: format!("message with {}", keyword),
            indicators: vec![Indicator::new("keyword", keyword)],
        }
    }

    fn engine(
        dispatcher: Arc<RecordingDispatcher>,
    ) -> (Arc<CrisisEscalationEngine>, SharedNotificationBus, Arc<MemoryArchive>) {
        let bus = NotificationBus::new().shared();
        let archive = Arc::new(MemoryArchive::new());
        let engine = CrisisEscalationEngine::new(
            Arc::clone(&bus),
            dispatcher,
            archive.clone(),
            Duration::from_secs(120),
        )
        .shared();
        (engine, bus, archive)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_alert_escalates_once() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (engine, bus, archive) = engine(Arc::clone(&dispatcher));
        let mut tap = bus.tap();

        let opened = engine.raise(signal("s-1", 5, "kill myself")).unwrap();
        assert!(opened.is_new());
        let alert_id = opened.alert().alert_id.clone();

        tokio::time::sleep(Duration::from_secs(125)).await;

        let alert = engine.get(&alert_id).unwrap();
        assert_eq!(alert.status, AlertStatus::Escalated);
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);
        assert_eq!(archive.len(), 1);
        assert!(engine.active_for_session("s-1").is_none());

        assert_eq!(tap.recv().await.unwrap().event_type(), "alert_opened");
        assert_eq!(tap.recv().await.unwrap().event_type(), "alert_escalated");

        // Timer path is exhausted; a manual expire does nothing
        assert!(!engine.expire(&alert_id).await.unwrap().applied());
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_before_timeout_cancels_escalation() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (engine, _bus, _archive) = engine(Arc::clone(&dispatcher));

        let alert_id = engine
            .raise(signal("s-1", 5, "kill myself"))
            .unwrap()
            .alert()
            .alert_id
            .clone();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let outcome = engine.acknowledge(&alert_id, "r-1").await.unwrap();
        assert!(outcome.applied());
        assert_eq!(outcome.alert.status, AlertStatus::Resolved);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(engine.get(&alert_id).unwrap().status, AlertStatus::Resolved);
        assert!(dispatcher.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_countdowns_runs_each_to_its_deadline() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (engine, _bus, _archive) = engine(Arc::clone(&dispatcher));
        let start = tokio::time::Instant::now();

        let acked = engine.raise(signal("s-1", 5, "kill myself")).unwrap();
        engine.raise(signal("s-2", 4, "hurt someone")).unwrap();
        assert_eq!(engine.pending_countdowns(), 2);

        engine
            .acknowledge(&acked.alert().alert_id, "r-1")
            .await
            .unwrap();
        engine.wait_for_countdowns().await;

        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(engine.pending_countdowns(), 0);
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);
        assert!(engine.list_active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_after_escalation_is_noop() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (engine, _bus, _archive) = engine(dispatcher);

        let alert_id = engine
            .raise(signal("s-1", 5, "kill myself"))
            .unwrap()
            .alert()
            .alert_id
            .clone();
        tokio::time::sleep(Duration::from_secs(125)).await;

        let outcome = engine.acknowledge(&alert_id, "r-1").await.unwrap();
        assert!(!outcome.applied());
        assert_eq!(outcome.alert.status, AlertStatus::Escalated);
        assert_eq!(outcome.alert.late_acknowledgements.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_high_risk_turns_update_single_alert() {
        let (engine, _bus, _archive) = engine(Arc::new(RecordingDispatcher::default()));

        let first = engine.raise(signal("s-1", 4, "hurt myself")).unwrap();
        let second = engine.raise(signal("s-1", 5, "end it all")).unwrap();
        let third = engine.raise(signal("s-1", 3, "end it all")).unwrap();

        assert!(first.is_new());
        assert!(matches!(second, AlertOutcome::Updated(_)));
        assert!(matches!(third, AlertOutcome::Unchanged(_)));
        assert_eq!(second.alert().alert_id, first.alert().alert_id);
        assert_eq!(third.alert().severity, 5);
        assert_eq!(engine.list_active().len(), 1);
    }

    #[tokio::test]
    async fn test_new_alert_after_resolution() {
        let (engine, _bus, _archive) = engine(Arc::new(RecordingDispatcher::default()));
        let first = engine.raise(signal("s-1", 5, "want to die")).unwrap();
        engine.stand_down_session("s-1").await.unwrap().unwrap();

        let second = engine.raise(signal("s-1", 5, "want to die")).unwrap();
        assert!(second.is_new());
        assert_ne!(second.alert().alert_id, first.alert().alert_id);
    }

    #[test]
    fn test_raise_without_runtime_is_fatal() {
        let bus = NotificationBus::new().shared();
        let engine = CrisisEscalationEngine::with_defaults(bus, Duration::from_secs(120)).shared();
        let err = engine.raise(signal("s-1", 5, "kill myself")).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(engine.alert_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_alert_is_benign_not_found() {
        let (engine, _bus, _archive) = engine(Arc::new(RecordingDispatcher::default()));
        let err = engine.acknowledge("missing", "r-1").await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_escalated_and_publishes() {
        let dispatcher = Arc::new(RecordingDispatcher {
            fail: true,
            ..Default::default()
        });
        let (engine, bus, _archive) = engine(dispatcher);
        let mut tap = bus.tap();

        let alert_id = engine
            .raise(signal("s-1", 5, "kill myself"))
            .unwrap()
            .alert()
            .alert_id
            .clone();
        let outcome = engine.expire(&alert_id).await.unwrap();
        assert!(outcome.applied());
        assert_eq!(engine.get(&alert_id).unwrap().status, AlertStatus::Escalated);

        let types: Vec<&str> = vec![
            tap.recv().await.unwrap().event_type(),
            tap.recv().await.unwrap().event_type(),
            tap.recv().await.unwrap().event_type(),
        ];
        assert_eq!(
            types,
            vec!["alert_opened", "alert_escalated", "emergency_dispatch_failed"]
        );
    }

    #[tokio::test]
    async fn test_prune_terminal_keeps_active() {
        let (engine, _bus, _archive) = engine(Arc::new(RecordingDispatcher::default()));
        let closed = engine.raise(signal("s-1", 5, "a")).unwrap();
        engine.raise(signal("s-2", 5, "b")).unwrap();
        engine
            .acknowledge(&closed.alert().alert_id, "r-1")
            .await
            .unwrap();

        let pruned = engine.prune_terminal(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(pruned, 1);
        assert_eq!(engine.alert_count(), 1);
        assert!(engine.active_for_session("s-2").is_some());
    }
}
