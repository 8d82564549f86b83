//! Notification bus for triage events
//!
//! Two delivery paths share one `publish`:
//!
//! - registered subscribers, each with an [`EventFilter`] and a bounded
//!   queue. Delivery is `try_send`: at most once, never blocking, and a full
//!   queue drops the event for that subscriber only.
//! - a broadcast tap for monitors that want everything (the daemon streams
//!   it to stdout).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::types::TriageEvent;

/// Channel capacity for the broadcast tap
const TAP_CAPACITY: usize = 256;

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Error type for bus operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Subscriber not found: {0}")]
    UnknownSubscriber(String),

    #[error("Subscriber queue full: {0}")]
    QueueFull(String),

    #[error("Subscriber channel closed: {0}")]
    ChannelClosed(String),
}

/// Result type for bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to NotificationBus
pub type SharedNotificationBus = Arc<NotificationBus>;

/// One event delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub subscriber_id: String,
    /// Set for targeted sends
    pub targeted: bool,
    pub event: TriageEvent,
}

/// Result of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Subscribers the event was queued for
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers found closed and removed
    pub pruned: usize,
    /// Broadcast tap receivers
    pub tapped: usize,
}

struct SubscriberEntry {
    filter: EventFilter,
    sender: mpsc::Sender<Delivery>,
}

/// Pub/sub fan-out with per-subscriber filters
pub struct NotificationBus {
    tap: broadcast::Sender<TriageEvent>,
    subscribers: RwLock<HashMap<String, SubscriberEntry>>,
    buffer: usize,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a bus with a custom per-subscriber queue depth
    pub fn with_buffer(buffer: usize) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            tap,
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedNotificationBus {
        Arc::new(self)
    }

    /// Register a subscriber. Re-subscribing an id replaces its filter and
    /// closes the previous handle.
    pub fn subscribe(&self, subscriber_id: &str, filter: EventFilter) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if subscribers
            .insert(subscriber_id.to_string(), SubscriberEntry { filter, sender })
            .is_some()
        {
            debug!(subscriber_id, "Subscriber replaced");
        } else {
            debug!(subscriber_id, "Subscriber registered");
        }
        Subscription {
            subscriber_id: subscriber_id.to_string(),
            receiver,
        }
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subscriber_id)
            .is_some()
    }

    /// Fan an event out to every matching subscriber and the tap.
    /// Never blocks and never fails.
    pub fn publish(&self, event: TriageEvent) -> PublishReport {
        let event_type = event.event_type();
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for (id, entry) in subscribers.iter() {
                if !entry.filter.matches(&event) {
                    continue;
                }
                let delivery = Delivery {
                    subscriber_id: id.clone(),
                    targeted: false,
                    event: event.clone(),
                };
                match entry.sender.try_send(delivery) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber_id = %id, event_type, "Subscriber queue full, event dropped");
                        report.dropped += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for id in &closed {
                if subscribers.get(id).is_some_and(|e| e.sender.is_closed()) {
                    subscribers.remove(id);
                    report.pruned += 1;
                }
            }
        }

        // No tap receivers is fine
        report.tapped = self.tap.send(event).unwrap_or(0);
        debug!(
            event_type,
            delivered = report.delivered,
            dropped = report.dropped,
            "Event published"
        );
        report
    }

    /// Deliver to one subscriber regardless of its filter
    pub fn send_to(&self, subscriber_id: &str, event: TriageEvent) -> EventBusResult<()> {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        let entry = subscribers
            .get(subscriber_id)
            .ok_or_else(|| EventBusError::UnknownSubscriber(subscriber_id.to_string()))?;
        entry
            .sender
            .try_send(Delivery {
                subscriber_id: subscriber_id.to_string(),
                targeted: true,
                event,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    EventBusError::QueueFull(subscriber_id.to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    EventBusError::ChannelClosed(subscriber_id.to_string())
                }
            })
    }

    /// Receive every published event
    pub fn tap(&self) -> broadcast::Receiver<TriageEvent> {
        self.tap.subscribe()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_subscribed(&self, subscriber_id: &str) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(subscriber_id)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a registered subscription
pub struct Subscription {
    subscriber_id: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Wait for the next delivery; `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

/// Event filter for selective subscription. An empty filter matches all events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    /// Only matches events that carry a specialty
    #[serde(default)]
    pub specialties: Option<Vec<String>>,
    /// Only matches events that carry a severity
    #[serde(default)]
    pub min_severity: Option<u8>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by session ID
    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Filter by handoff specialty
    pub fn specialties(mut self, specialties: Vec<&str>) -> Self {
        self.specialties = Some(specialties.into_iter().map(String::from).collect());
        self
    }

    pub fn min_severity(mut self, severity: u8) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &TriageEvent) -> bool {
        if let Some(ref sid) = self.session_id {
            if event.session_id() != sid {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref specialties) = self.specialties {
            match event.specialty() {
                Some(s) if specialties.iter().any(|x| x == s) => {}
                _ => return false,
            }
        }

        if let Some(min) = self.min_severity {
            match event.severity() {
                Some(severity) if severity >= min => {}
                _ => return false,
            }
        }

        true
    }
}

/// Filtered tap receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<TriageEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<TriageEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<TriageEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for tapping with filters
pub trait NotificationBusExt {
    fn tap_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl NotificationBusExt for NotificationBus {
    fn tap_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.tap(), filter)
    }
}

impl NotificationBusExt for SharedNotificationBus {
    fn tap_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.tap(), filter)
    }
}

/// Risk change event stamped now
pub(crate) fn risk_changed(session_id: &str, previous: u8, current: u8) -> TriageEvent {
    TriageEvent::RiskLevelChanged {
        session_id: session_id.to_string(),
        previous,
        current,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::Urgency;

    fn escalated(session: &str, severity: u8) -> TriageEvent {
        TriageEvent::AlertEscalated {
            alert_id: "a-1".into(),
            session_id: session.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    fn queued(specialty: &str) -> TriageEvent {
        TriageEvent::HandoffQueued {
            request_id: "h-1".into(),
            session_id: "s-1".into(),
            urgency: Urgency::Normal,
            specialty: Some(specialty.into()),
            queue_position: 1,
            estimated_wait_minutes: 10,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let bus = NotificationBus::new();
        let mut all = bus.subscribe("monitor", EventFilter::new());
        let mut crisis = bus.subscribe("crisis-team", EventFilter::new().specialties(vec!["crisis"]));

        let report = bus.publish(queued("anxiety"));
        assert_eq!(report.delivered, 1);

        let delivery = all.recv().await.unwrap();
        assert_eq!(delivery.subscriber_id, "monitor");
        assert!(!delivery.targeted);
        assert!(crisis.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let bus = NotificationBus::with_buffer(1);
        let mut sub = bus.subscribe("slow", EventFilter::new());

        assert_eq!(bus.publish(escalated("s-1", 5)).delivered, 1);
        let report = bus.publish(escalated("s-1", 5));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let bus = NotificationBus::new();
        let sub = bus.subscribe("gone", EventFilter::new());
        drop(sub);
        let report = bus.publish(escalated("s-1", 5));
        assert_eq!(report.pruned, 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_send_to_ignores_filter() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe("r-1", EventFilter::new().session("other"));
        bus.send_to("r-1", escalated("s-1", 5)).unwrap();
        let delivery = sub.try_recv().unwrap();
        assert!(delivery.targeted);

        let err = bus.send_to("nobody", escalated("s-1", 5)).unwrap_err();
        assert_eq!(err, EventBusError::UnknownSubscriber("nobody".into()));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .session("s-1")
            .types(vec!["alert_escalated", "alert_opened"])
            .min_severity(4);

        assert!(filter.matches(&escalated("s-1", 5)));
        assert!(!filter.matches(&escalated("s-2", 5)));
        assert!(!filter.matches(&escalated("s-1", 3)));
        assert!(!filter.matches(&queued("crisis")));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let _sub = bus.subscribe("m", EventFilter::new());
        assert!(bus.unsubscribe("m"));
        assert!(!bus.unsubscribe("m"));
        assert_eq!(bus.publish(escalated("s-1", 5)).delivered, 0);
    }

    #[tokio::test]
    async fn test_filtered_tap() {
        let bus = NotificationBus::new().shared();
        let mut filtered = bus.tap_filtered(EventFilter::new().session("target"));

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(escalated("other", 5));
            publisher.publish(escalated("target", 4));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.session_id(), "target");
    }
}
