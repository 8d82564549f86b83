//! Triage Service
//!
//! The per-message pipeline
//!
//! ```text
//! message ─► sentiment (degradable) ─► classify ─► append turn ─► emotions/technique
//!                                                       │
//!                      risk ≥ threshold or crisis protocol
//!                                                       ▼
//!                               raise alert ─► (new) crisis mode + high-urgency handoff
//! ```
//!
//! Turns for one session are serialized by [`SessionLocks`]; sessions never
//! contend with each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{archive_or_warn, ArchiveRecord, NullArchive, SharedArchive};
use crate::catalog::{Catalog, SharedCatalog};
use crate::classifier::{
    ClassificationResult, LexiconSentimentScorer, MessageClassifier, SentimentScore,
    SentimentScorer,
};
use crate::config::TriageConfig;
use crate::error::{TriageError, TriageResult};
use crate::escalation::{
    AlertOutcome, CrisisAlert, CrisisEscalationEngine, CrisisSignal, LoggingDispatcher,
    SharedDispatcher, TransitionOutcome,
};
use crate::events::{risk_changed, NotificationBus, SessionEndReason, SharedNotificationBus, TriageEvent};
use crate::handoff::{
    HandoffCriteria, HandoffMatcher, HandoffRequest, SharedDirectory, StaticDirectory, Urgency,
};
use crate::resilience::{Degraded, DegradationLevel};
use crate::session::{
    HandoffRef, InMemorySessionStore, Session, SessionLocks, SessionPolicy, SessionSnapshot,
    SharedSessionStore, Turn,
};

/// Everything a caller needs after one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub turn_index: u64,
    pub classification: ClassificationResult,
    /// Session risk level after this turn
    pub risk_level: u8,
    pub crisis_mode: bool,
    pub alert: Option<AlertOutcome>,
    /// Handoff opened because this turn opened an alert
    pub handoff: Option<HandoffRequest>,
    pub degradation: DegradationLevel,
    pub warnings: Vec<String>,
}

/// Counts from one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub expired_handoffs: usize,
    pub pruned_alerts: usize,
}

/// Builder for [`TriageService`]; every collaborator has an offline default
pub struct TriageServiceBuilder {
    config: TriageConfig,
    catalog: Option<SharedCatalog>,
    sentiment: Option<Arc<dyn SentimentScorer>>,
    directory: Option<SharedDirectory>,
    dispatcher: Option<SharedDispatcher>,
    archive: Option<SharedArchive>,
    store: Option<SharedSessionStore>,
    bus: Option<SharedNotificationBus>,
}

impl TriageServiceBuilder {
    pub fn catalog(mut self, catalog: SharedCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn sentiment(mut self, scorer: Arc<dyn SentimentScorer>) -> Self {
        self.sentiment = Some(scorer);
        self
    }

    pub fn directory(mut self, directory: SharedDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn archive(mut self, archive: SharedArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn store(mut self, store: SharedSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: SharedNotificationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> TriageResult<Arc<TriageService>> {
        self.config.validate()?;

        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Catalog::builtin()?.shared(),
        };
        let bus = self
            .bus
            .unwrap_or_else(|| NotificationBus::with_buffer(self.config.subscriber_buffer).shared());
        let archive = self.archive.unwrap_or_else(|| Arc::new(NullArchive));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(StaticDirectory::default()));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(LoggingDispatcher));
        let sessions = self.store.unwrap_or_else(|| {
            InMemorySessionStore::new(SessionPolicy::from_config(&self.config)).shared()
        });

        let escalation = CrisisEscalationEngine::new(
            Arc::clone(&bus),
            dispatcher,
            Arc::clone(&archive),
            self.config.ack_timeout(),
        )
        .shared();
        let handoffs = Arc::new(HandoffMatcher::from_config(
            directory,
            Arc::clone(&bus),
            &self.config,
        ));

        info!(
            catalog_version = catalog.version(),
            protocols = catalog.len(),
            ack_timeout_secs = self.config.ack_timeout_secs,
            threshold = self.config.escalation_threshold,
            "Triage service ready"
        );

        Ok(Arc::new(TriageService {
            classifier: MessageClassifier::new(catalog),
            sentiment: self
                .sentiment
                .unwrap_or_else(|| Arc::new(LexiconSentimentScorer::new())),
            sessions,
            locks: SessionLocks::new(),
            escalation,
            handoffs,
            bus,
            archive,
            config: self.config,
        }))
    }
}

/// Orchestrates classifier, session store, escalation and handoff
pub struct TriageService {
    config: TriageConfig,
    classifier: MessageClassifier,
    sentiment: Arc<dyn SentimentScorer>,
    sessions: SharedSessionStore,
    locks: SessionLocks,
    escalation: Arc<CrisisEscalationEngine>,
    handoffs: Arc<HandoffMatcher>,
    bus: SharedNotificationBus,
    archive: SharedArchive,
}

impl TriageService {
    pub fn builder(config: TriageConfig) -> TriageServiceBuilder {
        TriageServiceBuilder {
            config,
            catalog: None,
            sentiment: None,
            directory: None,
            dispatcher: None,
            archive: None,
            store: None,
            bus: None,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SharedCatalog {
        self.classifier.catalog()
    }

    pub fn bus(&self) -> &SharedNotificationBus {
        &self.bus
    }

    pub fn escalation(&self) -> &Arc<CrisisEscalationEngine> {
        &self.escalation
    }

    pub fn handoffs(&self) -> &Arc<HandoffMatcher> {
        &self.handoffs
    }

    pub fn sessions(&self) -> &SharedSessionStore {
        &self.sessions
    }

    fn require_session_id(session_id: &str) -> TriageResult<()> {
        if session_id.trim().is_empty() {
            return Err(TriageError::validation("session_id must not be empty"));
        }
        Ok(())
    }

    async fn score(&self, raw_message: &str) -> Degraded<Option<SentimentScore>> {
        if raw_message.trim().is_empty() {
            return Degraded::full(Some(SentimentScore::neutral()));
        }
        let name = self.sentiment.name().to_string();
        Degraded::from_result(&name, self.sentiment.score(raw_message).await)
    }

    /// Classify against the current session state without recording anything
    pub async fn classify(
        &self,
        session_id: &str,
        raw_message: &str,
    ) -> TriageResult<ClassificationResult> {
        Self::require_session_id(session_id)?;
        let session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => Session::new(session_id, None),
        };
        let sentiment = self.score(raw_message).await;
        Ok(self
            .classifier
            .classify(&session, raw_message, sentiment.value.as_ref()))
    }

    /// Run one inbound message through the full pipeline.
    ///
    /// Only a fatal error (escalation timer unavailable) or invalid input
    /// fails the turn; collaborator failures degrade it.
    pub async fn handle_message(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        raw_message: &str,
    ) -> TriageResult<TurnOutcome> {
        Self::require_session_id(session_id)?;
        let _turn_guard = self.locks.lock(session_id).await;

        let session = self.sessions.get_or_create(session_id, user_id).await?;
        let sentiment = self.score(raw_message).await;
        let classification = self
            .classifier
            .classify(&session, raw_message, sentiment.value.as_ref());

        let mut warnings = sentiment.warnings.clone();
        warnings.extend(classification.warnings.iter().cloned());
        let degradation = sentiment.level.max(classification.degradation);

        let turn = Turn::from_classification(raw_message, &classification);
        let updated = self.sessions.append_turn(session_id, turn).await?;
        let turn_index = updated.last_turn().map(|t| t.turn_index).unwrap_or(0);

        for emotion in &classification.detected_emotions {
            self.sessions
                .record_emotion(session_id, &emotion.emotion, emotion.intensity)
                .await?;
        }
        self.sessions
            .increment_technique(session_id, &classification.response.technique)
            .await?;

        if updated.current_risk_level != session.current_risk_level {
            self.bus.publish(risk_changed(
                session_id,
                session.current_risk_level,
                updated.current_risk_level,
            ));
        }

        debug!(session_id, turn_index, summary = %classification.summary(), "Turn classified");

        let mut alert = None;
        let mut handoff = None;
        let mut crisis_mode = updated.crisis_mode;

        if classification.requires_escalation(self.config.escalation_threshold) {
            let signal = CrisisSignal::from_classification(
                session_id,
                updated.user_id.clone(),
                raw_message,
                &classification,
            );
            let outcome = match self.escalation.raise(signal) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_fatal() {
                        error!(session_id, error = %e, "Cannot arm crisis escalation");
                    }
                    return Err(e);
                }
            };

            let alert_id = outcome.alert().alert_id.clone();
            self.sessions
                .set_crisis_mode(session_id, true, Some(alert_id.clone()))
                .await?;
            crisis_mode = true;

            if outcome.is_new() {
                let mut criteria = HandoffCriteria::new(format!("crisis alert {}", alert_id))
                    .with_urgency(Urgency::High)
                    .with_specialty(self.config.crisis_specialty.clone());
                criteria.user_id = updated.user_id.clone();
                match self.handoffs.request_handoff(session_id, criteria).await {
                    Ok(result) => {
                        warnings.extend(result.warnings.iter().cloned());
                        self.record_handoff(&result.value).await;
                        handoff = Some(result.value);
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "Crisis handoff request failed");
                        warnings.push(format!("crisis handoff failed: {}", e));
                    }
                }
            }
            alert = Some(outcome);
        }

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            turn_index,
            risk_level: updated.current_risk_level,
            crisis_mode,
            alert,
            handoff,
            degradation,
            warnings,
            classification,
        })
    }

    /// Responder acknowledgement of a crisis alert
    pub async fn acknowledge_crisis_alert(
        &self,
        alert_id: &str,
        responder_id: &str,
    ) -> TriageResult<TransitionOutcome> {
        let outcome = self.escalation.acknowledge(alert_id, responder_id).await?;
        if outcome.applied() {
            self.leave_crisis_mode(&outcome.alert).await?;
        }
        Ok(outcome)
    }

    /// The user said they are safe; resolves the session's active alert
    pub async fn user_is_safe(&self, session_id: &str) -> TriageResult<Option<TransitionOutcome>> {
        Self::require_session_id(session_id)?;
        let outcome = self.escalation.stand_down_session(session_id).await?;
        if let Some(outcome) = &outcome {
            if outcome.applied() {
                self.leave_crisis_mode(&outcome.alert).await?;
            }
        }
        Ok(outcome)
    }

    async fn leave_crisis_mode(&self, alert: &CrisisAlert) -> TriageResult<()> {
        let tracked = self
            .sessions
            .get(&alert.session_id)
            .await?
            .is_some_and(|s| s.active_alert_id.as_deref() == Some(alert.alert_id.as_str()));
        if tracked {
            self.sessions
                .set_crisis_mode(&alert.session_id, false, None)
                .await?;
        }
        Ok(())
    }

    pub async fn request_handoff(
        &self,
        session_id: &str,
        mut criteria: HandoffCriteria,
    ) -> TriageResult<Degraded<HandoffRequest>> {
        Self::require_session_id(session_id)?;
        let session = self
            .sessions
            .get_or_create(session_id, criteria.user_id.as_deref())
            .await?;
        if criteria.user_id.is_none() {
            criteria.user_id = session.user_id;
        }
        let result = self.handoffs.request_handoff(session_id, criteria).await?;
        self.record_handoff(&result.value).await;
        Ok(result)
    }

    pub async fn cancel_handoff(&self, request_id: &str) -> TriageResult<HandoffRequest> {
        let request = self.handoffs.cancel(request_id).await?;
        self.record_handoff(&request).await;
        archive_or_warn(self.archive.as_ref(), ArchiveRecord::Handoff(request.clone())).await;
        Ok(request)
    }

    pub async fn responder_available(
        &self,
        responder_id: &str,
    ) -> TriageResult<Option<HandoffRequest>> {
        let assigned = self.handoffs.responder_available(responder_id).await?;
        if let Some(request) = &assigned {
            self.record_handoff(request).await;
        }
        Ok(assigned)
    }

    /// Write a handoff outcome back to its session if the session is live
    async fn record_handoff(&self, request: &HandoffRequest) {
        let live = matches!(self.sessions.get(&request.session_id).await, Ok(Some(_)));
        if !live {
            return;
        }
        let handoff = HandoffRef {
            request_id: request.request_id.clone(),
            status: request.status,
            responder_id: request.assigned_responder_id.clone(),
            queue_position: request.queue_position,
        };
        if let Err(e) = self
            .sessions
            .record_handoff(&request.session_id, handoff)
            .await
        {
            warn!(request_id = %request.request_id, error = %e, "Failed to record handoff");
        }
    }

    /// End a session: archive it and close its handoffs.
    /// An active alert stays open; its countdown is the safety net.
    pub async fn end_session(&self, session_id: &str) -> TriageResult<SessionSnapshot> {
        Self::require_session_id(session_id)?;
        let guard = self.locks.lock(session_id).await;
        let session = self
            .sessions
            .end_session(session_id)
            .await?
            .ok_or_else(|| TriageError::not_found("session", session_id))?;
        drop(guard);
        self.locks.release(session_id);

        info!(session_id, turns = session.turn_count(), "Session ended");
        Ok(self.retire(session, SessionEndReason::Ended).await)
    }

    async fn retire(&self, session: Session, reason: SessionEndReason) -> SessionSnapshot {
        for request in self.handoffs.release_session(&session.session_id).await {
            archive_or_warn(self.archive.as_ref(), ArchiveRecord::Handoff(request)).await;
        }
        if let Some(alert) = self.escalation.active_for_session(&session.session_id) {
            warn!(
                session_id = %session.session_id,
                alert_id = %alert.alert_id,
                "Session closed with an active crisis alert"
            );
        }
        self.bus.publish(TriageEvent::SessionEnded {
            session_id: session.session_id.clone(),
            reason,
            turn_count: session.turn_count(),
            timestamp: Utc::now(),
        });
        let snapshot = session.snapshot();
        archive_or_warn(self.archive.as_ref(), ArchiveRecord::Session(session)).await;
        snapshot
    }

    /// Read-only session summary
    pub async fn snapshot(&self, session_id: &str) -> TriageResult<Option<SessionSnapshot>> {
        Self::require_session_id(session_id)?;
        self.sessions.snapshot(session_id).await
    }

    pub fn get_alert(&self, alert_id: &str) -> TriageResult<CrisisAlert> {
        self.escalation
            .get(alert_id)
            .ok_or_else(|| TriageError::not_found("alert", alert_id))
    }

    pub fn list_active_alerts(&self) -> Vec<CrisisAlert> {
        self.escalation.list_active()
    }

    /// Expire idle sessions and stale handoffs, forget old terminal alerts
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> TriageResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        for session_id in self.sessions.idle_session_ids(now).await {
            // Wait out any turn in flight; it refreshes activity before releasing
            let guard = self.locks.lock(&session_id).await;
            let expired = self.sessions.expire_if_idle(&session_id, now).await?;
            drop(guard);
            let Some(session) = expired else {
                continue;
            };
            self.locks.release(&session_id);
            info!(session_id = %session_id, "Session expired");
            self.retire(session, SessionEndReason::Expired).await;
            report.expired_sessions += 1;
        }

        for request in self.handoffs.expire_stale(now).await {
            self.record_handoff(&request).await;
            archive_or_warn(self.archive.as_ref(), ArchiveRecord::Handoff(request)).await;
            report.expired_handoffs += 1;
        }

        report.pruned_alerts = self
            .escalation
            .prune_terminal(now - self.config.session_ttl());

        if report != MaintenanceReport::default() {
            debug!(?report, "Maintenance pass");
        }
        Ok(report)
    }

    /// Run maintenance on the configured interval until cancelled
    pub fn spawn_maintenance(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.config.maintenance_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.run_maintenance(Utc::now()).await {
                            warn!(error = %e, "Maintenance pass failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::AlertStatus;
    use crate::handoff::HandoffStatus;

    fn service() -> Arc<TriageService> {
        TriageService::builder(TriageConfig::default()).build().unwrap()
    }

    #[tokio::test]
    async fn test_anxious_message_no_alert() {
        let svc = service();
        let outcome = svc
            .handle_message("s-1", None, "I feel a bit anxious about my exam")
            .await
            .unwrap();
        assert_eq!(outcome.classification.protocol_id(), Some("generalized-anxiety"));
        assert_eq!(outcome.classification.risk_score, 2);
        assert!(outcome.alert.is_none());
        assert!(!outcome.crisis_mode);
        assert!(svc.list_active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_crisis_message_opens_alert_and_handoff() {
        let svc = service();
        let outcome = svc
            .handle_message("s-1", Some("u-1"), "I want to kill myself")
            .await
            .unwrap();

        assert_eq!(outcome.classification.risk_score, 5);
        assert_eq!(outcome.risk_level, 5);
        assert!(outcome.crisis_mode);
        let alert = outcome.alert.unwrap();
        assert!(alert.is_new());
        assert_eq!(alert.alert().status, AlertStatus::Active);
        assert_eq!(alert.alert().user_id.as_deref(), Some("u-1"));

        let handoff = outcome.handoff.unwrap();
        assert_eq!(handoff.urgency, Urgency::High);
        assert_eq!(handoff.status, HandoffStatus::Queued);

        let snapshot = svc.snapshot("s-1").await.unwrap().unwrap();
        assert!(snapshot.crisis_mode);
        assert_eq!(snapshot.handoff.unwrap().status, HandoffStatus::Queued);
    }

    #[tokio::test]
    async fn test_ack_leaves_crisis_mode() {
        let svc = service();
        let outcome = svc
            .handle_message("s-1", None, "I want to kill myself")
            .await
            .unwrap();
        let alert_id = outcome.alert.unwrap().alert().alert_id.clone();

        let ack = svc.acknowledge_crisis_alert(&alert_id, "r-1").await.unwrap();
        assert!(ack.applied());
        assert!(!svc.snapshot("s-1").await.unwrap().unwrap().crisis_mode);

        let again = svc.acknowledge_crisis_alert(&alert_id, "r-2").await.unwrap();
        assert!(!again.applied());
    }

    #[tokio::test]
    async fn test_user_is_safe_without_alert() {
        let svc = service();
        assert!(svc.user_is_safe("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_message_is_fallback_turn() {
        let svc = service();
        let outcome = svc.handle_message("s-1", None, "   ").await.unwrap();
        assert!(outcome.classification.protocol.is_none());
        assert!(outcome.classification.response.is_fallback);
        assert_eq!(outcome.turn_index, 0);
    }

    #[tokio::test]
    async fn test_missing_session_id_rejected() {
        let svc = service();
        let err = svc.handle_message("", None, "hello").await.unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
    }

    #[tokio::test]
    async fn test_end_session_then_not_found() {
        let svc = service();
        svc.handle_message("s-1", None, "I can't sleep").await.unwrap();
        let snapshot = svc.end_session("s-1").await.unwrap();
        assert_eq!(snapshot.turn_count, 1);
        assert!(svc.end_session("s-1").await.unwrap_err().is_benign());
    }

    #[tokio::test]
    async fn test_maintenance_expires_idle_sessions() {
        let svc = service();
        svc.handle_message("s-1", None, "hello").await.unwrap();
        let report = svc
            .run_maintenance(Utc::now() + chrono::Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(report.expired_sessions, 1);
        assert!(svc.snapshot("s-1").await.unwrap().is_none());
    }
}
