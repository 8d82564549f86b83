//! Handoff Matcher
//!
//! Assigns an immediately available responder or queues the request with a
//! wait estimate of `position × average_service_minutes`. All queue edits
//! and position recomputation happen under one lock, so two requests can
//! never be handed the same position.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::directory::{find_responder, Responder, SharedDirectory};
use super::queue::{bucket_for, HandoffQueue};
use super::types::{HandoffCriteria, HandoffRequest, HandoffStatus, RequestId, ResponderId};
use crate::config::TriageConfig;
use crate::error::{TriageError, TriageResult};
use crate::events::{SharedNotificationBus, TriageEvent};
use crate::resilience::Degraded;

#[derive(Default)]
struct MatcherState {
    requests: HashMap<RequestId, HandoffRequest>,
    queue: HandoffQueue,
    /// Responders holding an assignment that has not been completed
    engaged: HashSet<ResponderId>,
}

impl MatcherState {
    /// Rewrite position and wait estimate for everything left in a bucket
    fn renumber(&mut self, bucket: &str, average_service_minutes: u32) {
        for (i, id) in self.queue.ordered(bucket).iter().enumerate() {
            if let Some(request) = self.requests.get_mut(id) {
                let position = i as u32 + 1;
                request.queue_position = Some(position);
                request.estimated_wait_minutes = position * average_service_minutes;
            }
        }
    }
}

/// Matches handoff requests to responders
pub struct HandoffMatcher {
    directory: SharedDirectory,
    bus: SharedNotificationBus,
    state: Mutex<MatcherState>,
    average_service_minutes: u32,
    expiry: chrono::Duration,
}

impl HandoffMatcher {
    pub fn new(
        directory: SharedDirectory,
        bus: SharedNotificationBus,
        average_service_minutes: u32,
        expiry: chrono::Duration,
    ) -> Self {
        Self {
            directory,
            bus,
            state: Mutex::new(MatcherState::default()),
            average_service_minutes,
            expiry,
        }
    }

    pub fn from_config(
        directory: SharedDirectory,
        bus: SharedNotificationBus,
        config: &TriageConfig,
    ) -> Self {
        Self::new(
            directory,
            bus,
            config.average_service_minutes,
            config.handoff_expiry(),
        )
    }

    /// Assign or queue a new request.
    ///
    /// A failing directory does not fail the request: it is queued and the
    /// result carries a warning.
    pub async fn request_handoff(
        &self,
        session_id: &str,
        criteria: HandoffCriteria,
    ) -> TriageResult<Degraded<HandoffRequest>> {
        if session_id.trim().is_empty() {
            return Err(TriageError::validation("session_id must not be empty"));
        }
        if criteria
            .preferred_specialty
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(TriageError::validation("preferred_specialty must not be blank"));
        }

        let roster = Degraded::list_from_result("directory", self.directory.list_responders().await);
        let mut request = HandoffRequest::new(session_id, &criteria);

        let mut state = self.state.lock().await;
        let chosen = select_responder(&roster.value, &criteria, &state.engaged).cloned();

        match chosen {
            Some(responder) => {
                request.transition(HandoffStatus::Assigned);
                request.assigned_responder_id = Some(responder.id.clone());
                request.estimated_wait_minutes = responder.estimated_wait_minutes;
                state.engaged.insert(responder.id.clone());
                state
                    .requests
                    .insert(request.request_id.clone(), request.clone());
                drop(state);

                info!(
                    request_id = %request.request_id,
                    session_id,
                    responder_id = %responder.id,
                    "Handoff assigned"
                );
                self.publish_assigned(&request);
            }
            None => {
                let bucket = bucket_for(request.preferred_specialty.as_deref());
                request.transition(HandoffStatus::Queued);
                request.queued_at = Some(Utc::now());
                let position = state
                    .queue
                    .enqueue(&bucket, &request.request_id, request.urgency);
                state
                    .requests
                    .insert(request.request_id.clone(), request.clone());
                state.renumber(&bucket, self.average_service_minutes);
                request = state
                    .requests
                    .get(&request.request_id)
                    .cloned()
                    .unwrap_or(request);
                drop(state);

                info!(
                    request_id = %request.request_id,
                    session_id,
                    bucket = %bucket,
                    position,
                    "Handoff queued"
                );
                self.bus.publish(TriageEvent::HandoffQueued {
                    request_id: request.request_id.clone(),
                    session_id: request.session_id.clone(),
                    urgency: request.urgency,
                    specialty: request.preferred_specialty.clone(),
                    queue_position: position,
                    estimated_wait_minutes: request.estimated_wait_minutes,
                    timestamp: request.updated_at,
                });
            }
        }

        Ok(Degraded {
            value: request,
            level: roster.level,
            warnings: roster.warnings,
            timestamp: roster.timestamp,
        })
    }

    /// A responder freed up: release them and hand them the first compatible
    /// queued request from their specialties, then the general bucket.
    pub async fn responder_available(
        &self,
        responder_id: &str,
    ) -> TriageResult<Option<HandoffRequest>> {
        let responder = find_responder(self.directory.as_ref(), responder_id).await?;

        let mut state = self.state.lock().await;
        state.engaged.remove(responder_id);

        let mut buckets: Vec<String> = responder
            .specialties
            .iter()
            .map(|s| bucket_for(Some(s)))
            .collect();
        buckets.push(bucket_for(None));

        let mut picked = None;
        'buckets: for bucket in &buckets {
            for id in state.queue.ordered(bucket) {
                let compatible = state.requests.get(&id).is_some_and(|r| {
                    r.language
                        .as_deref()
                        .map_or(true, |lang| responder.speaks(lang))
                });
                if compatible {
                    picked = Some((bucket.clone(), id));
                    break 'buckets;
                }
            }
        }

        let Some((bucket, request_id)) = picked else {
            debug!(responder_id, "Responder available, queue empty");
            return Ok(None);
        };

        state.queue.remove(&bucket, &request_id);
        state.engaged.insert(responder.id.clone());
        let assigned = match state.requests.get_mut(&request_id) {
            Some(request) => {
                request.transition(HandoffStatus::Assigned);
                request.assigned_responder_id = Some(responder.id.clone());
                request.estimated_wait_minutes = 0;
                request.clone()
            }
            None => return Err(TriageError::not_found("handoff", request_id)),
        };
        state.renumber(&bucket, self.average_service_minutes);
        drop(state);

        info!(
            request_id = %assigned.request_id,
            responder_id,
            "Queued handoff assigned"
        );
        self.publish_assigned(&assigned);
        Ok(Some(assigned))
    }

    /// Cancel a request. Unknown ids (including already expired ones) are
    /// a benign `NotFound`. The cancelled request is forgotten and returned
    /// for archiving.
    pub async fn cancel(&self, request_id: &str) -> TriageResult<HandoffRequest> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| TriageError::not_found("handoff", request_id))?;

        let mut request = request;
        if !request.transition(HandoffStatus::Cancelled) {
            return Ok(request);
        }

        let bucket = bucket_for(request.preferred_specialty.as_deref());
        if state.queue.remove(&bucket, request_id) {
            state.renumber(&bucket, self.average_service_minutes);
        }
        if let Some(responder) = &request.assigned_responder_id {
            state.engaged.remove(responder);
        }
        state.requests.remove(request_id);
        drop(state);

        debug!(request_id, "Handoff cancelled");
        self.bus.publish(TriageEvent::HandoffCancelled {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            specialty: request.preferred_specialty.clone(),
            timestamp: request.updated_at,
        });
        Ok(request)
    }

    /// Close every request of an ended session: open ones are cancelled,
    /// assigned ones completed. Returns them for archiving.
    pub async fn release_session(&self, session_id: &str) -> Vec<HandoffRequest> {
        let ids: Vec<RequestId> = self
            .state
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.request_id.clone())
            .collect();

        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            let assigned = self
                .get(&id)
                .await
                .is_some_and(|r| r.status == HandoffStatus::Assigned);
            let result = if assigned {
                self.complete(&id).await
            } else {
                self.cancel(&id).await
            };
            match result {
                Ok(request) => released.push(request),
                Err(e) if e.is_benign() => {}
                Err(e) => warn!(request_id = %id, error = %e, "Failed to release handoff"),
            }
        }
        released
    }

    /// Finish an assigned request and free its responder
    pub async fn complete(&self, request_id: &str) -> TriageResult<HandoffRequest> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get(request_id)
            .ok_or_else(|| TriageError::not_found("handoff", request_id))?;
        if request.status != HandoffStatus::Assigned {
            return Err(TriageError::InvalidTransition {
                from: request.status.to_string(),
                to: "completed".to_string(),
            });
        }
        let request = state
            .requests
            .remove(request_id)
            .ok_or_else(|| TriageError::not_found("handoff", request_id))?;
        if let Some(responder) = &request.assigned_responder_id {
            state.engaged.remove(responder);
        }
        Ok(request)
    }

    /// Expire queued requests older than the expiry bound
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Vec<HandoffRequest> {
        let mut state = self.state.lock().await;
        let stale: Vec<RequestId> = state
            .requests
            .values()
            .filter(|r| {
                r.status == HandoffStatus::Queued
                    && r.queued_at.is_some_and(|at| now - at >= self.expiry)
            })
            .map(|r| r.request_id.clone())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        let mut touched = HashSet::new();
        for id in stale {
            if let Some(mut request) = state.requests.remove(&id) {
                let bucket = bucket_for(request.preferred_specialty.as_deref());
                state.queue.remove(&bucket, &id);
                touched.insert(bucket);
                request.transition(HandoffStatus::Expired);
                expired.push(request);
            }
        }
        for bucket in touched {
            state.renumber(&bucket, self.average_service_minutes);
        }
        drop(state);

        for request in &expired {
            warn!(
                request_id = %request.request_id,
                session_id = %request.session_id,
                "Handoff expired without a responder"
            );
            self.bus.publish(TriageEvent::HandoffExpired {
                request_id: request.request_id.clone(),
                session_id: request.session_id.clone(),
                specialty: request.preferred_specialty.clone(),
                timestamp: request.updated_at,
            });
        }
        expired
    }

    /// Current 1-based queue position; `None` once assigned
    pub async fn queue_position(&self, request_id: &str) -> TriageResult<Option<u32>> {
        let state = self.state.lock().await;
        let request = state
            .requests
            .get(request_id)
            .ok_or_else(|| TriageError::not_found("handoff", request_id))?;
        let bucket = bucket_for(request.preferred_specialty.as_deref());
        Ok(state.queue.position(&bucket, request_id))
    }

    pub async fn get(&self, request_id: &str) -> Option<HandoffRequest> {
        self.state.lock().await.requests.get(request_id).cloned()
    }

    /// Queue length of one specialty bucket
    pub async fn queue_len(&self, specialty: Option<&str>) -> usize {
        self.state.lock().await.queue.len(&bucket_for(specialty))
    }

    fn publish_assigned(&self, request: &HandoffRequest) {
        if let Some(responder_id) = &request.assigned_responder_id {
            self.bus.publish(TriageEvent::HandoffAssigned {
                request_id: request.request_id.clone(),
                session_id: request.session_id.clone(),
                responder_id: responder_id.clone(),
                urgency: request.urgency,
                specialty: request.preferred_specialty.clone(),
                timestamp: request.updated_at,
            });
        }
    }
}

/// Immediate, unengaged, specialty/language compatible; lowest wait wins,
/// directory order breaks ties.
fn select_responder<'a>(
    roster: &'a [Responder],
    criteria: &HandoffCriteria,
    engaged: &HashSet<ResponderId>,
) -> Option<&'a Responder> {
    use super::directory::Availability;

    roster
        .iter()
        .filter(|r| r.availability == Availability::Immediate)
        .filter(|r| !engaged.contains(&r.id))
        .filter(|r| {
            criteria
                .preferred_specialty
                .as_deref()
                .map_or(true, |s| r.has_specialty(s.trim()))
        })
        .filter(|r| criteria.language.as_deref().map_or(true, |l| r.speaks(l)))
        .min_by_key(|r| r.estimated_wait_minutes)
}
