//! Integration tests for the Handoff Matcher
//!
//! Queue ordering, wait estimates and directory outages. The directory is a
//! mockall double so outages can be injected per call.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use triage::events::{EventFilter, NotificationBus};
use triage::handoff::{
    Availability, HandoffCriteria, HandoffMatcher, HandoffStatus, Responder, ResponderDirectory,
    Urgency,
};
use triage::{DegradationLevel, TriageError, TriageResult};

mock! {
    pub Directory {}

    #[async_trait]
    impl ResponderDirectory for Directory {
        async fn list_responders(&self) -> TriageResult<Vec<Responder>>;
    }
}

fn matcher_with(directory: MockDirectory) -> HandoffMatcher {
    HandoffMatcher::new(
        Arc::new(directory),
        NotificationBus::new().shared(),
        10,
        chrono::Duration::minutes(30),
    )
}

fn empty_directory() -> MockDirectory {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_responders()
        .returning(|| Ok(Vec::new()));
    directory
}

/// Test: nobody available and an empty queue → position 1, 10 minutes
#[tokio::test]
async fn test_first_queued_request_waits_one_slot() {
    let matcher = matcher_with(empty_directory());

    let result = matcher
        .request_handoff("s-1", HandoffCriteria::new("wants to talk"))
        .await
        .unwrap();

    assert_eq!(result.level, DegradationLevel::Full);
    assert_eq!(result.value.status, HandoffStatus::Queued);
    assert_eq!(result.value.queue_position, Some(1));
    assert_eq!(result.value.estimated_wait_minutes, 10);
}

/// Test: same-urgency positions strictly increase in arrival order
#[tokio::test]
async fn test_positions_increase_in_arrival_order() {
    let matcher = matcher_with(empty_directory());

    let mut positions = Vec::new();
    for i in 0..5 {
        let request = matcher
            .request_handoff(&format!("s-{}", i), HandoffCriteria::new("talk"))
            .await
            .unwrap()
            .value;
        positions.push(request.queue_position.unwrap());
    }
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
}

/// Test: high urgency lands ahead of normal/low but behind earlier high
#[tokio::test]
async fn test_two_tier_priority() {
    let matcher = matcher_with(empty_directory());
    let criteria = |urgency| HandoffCriteria::new("talk").with_urgency(urgency);

    let low = matcher.request_handoff("s-1", criteria(Urgency::Low)).await.unwrap().value;
    let normal = matcher.request_handoff("s-2", criteria(Urgency::Normal)).await.unwrap().value;
    let high_a = matcher.request_handoff("s-3", criteria(Urgency::High)).await.unwrap().value;
    let high_b = matcher.request_handoff("s-4", criteria(Urgency::High)).await.unwrap().value;

    assert_eq!(high_a.queue_position, Some(1));
    assert_eq!(high_b.queue_position, Some(2));
    assert_eq!(matcher.queue_position(&low.request_id).await.unwrap(), Some(3));
    assert_eq!(matcher.queue_position(&normal.request_id).await.unwrap(), Some(4));
}

/// Test: concurrent requests never share a position
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_unique_positions() {
    let matcher = Arc::new(matcher_with(empty_directory()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let matcher = Arc::clone(&matcher);
        handles.push(tokio::spawn(async move {
            matcher
                .request_handoff(&format!("s-{}", i), HandoffCriteria::new("talk"))
                .await
                .unwrap()
                .value
                .queue_position
                .unwrap()
        }));
    }
    let mut positions = Vec::new();
    for handle in handles {
        positions.push(handle.await.unwrap());
    }
    positions.sort_unstable();
    assert_eq!(positions, (1..=20).collect::<Vec<u32>>());
}

/// Test: a directory outage degrades to queueing with a warning
#[tokio::test]
async fn test_directory_outage_queues_with_warning() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_responders()
        .times(1)
        .returning(|| Err(TriageError::upstream("directory", "503 from roster service")));
    let matcher = matcher_with(directory);

    let result = matcher
        .request_handoff("s-1", HandoffCriteria::new("talk").with_urgency(Urgency::High))
        .await
        .unwrap();

    assert_eq!(result.level, DegradationLevel::Partial);
    assert!(result.warnings[0].contains("503"));
    assert_eq!(result.value.status, HandoffStatus::Queued);
}

/// Test: an available responder is assigned and notified
#[tokio::test]
async fn test_assignment_notifies_subscribers() {
    let mut directory = MockDirectory::new();
    directory.expect_list_responders().returning(|| {
        Ok(vec![Responder::new("r-1", Availability::Immediate)
            .with_specialties(&["crisis"])
            .with_wait(3)])
    });
    let bus = NotificationBus::new().shared();
    let mut team = bus.subscribe(
        "crisis-team",
        EventFilter::new().specialties(vec!["crisis"]),
    );
    let matcher = HandoffMatcher::new(
        Arc::new(directory),
        Arc::clone(&bus),
        10,
        chrono::Duration::minutes(30),
    );

    let request = matcher
        .request_handoff("s-1", HandoffCriteria::new("crisis").with_specialty("crisis"))
        .await
        .unwrap()
        .value;

    assert_eq!(request.status, HandoffStatus::Assigned);
    assert_eq!(request.estimated_wait_minutes, 3);
    let delivery = team.recv().await.unwrap();
    assert_eq!(delivery.event.event_type(), "handoff_assigned");
}

/// Test: requests expire after the bound and later cancels are benign
#[tokio::test]
async fn test_expiry_bound() {
    let matcher = matcher_with(empty_directory());
    let request = matcher
        .request_handoff("s-1", HandoffCriteria::new("talk"))
        .await
        .unwrap()
        .value;
    let queued_at = request.queued_at.unwrap();

    let early = matcher
        .expire_stale(queued_at + chrono::Duration::minutes(29))
        .await;
    assert!(early.is_empty());

    let expired = matcher
        .expire_stale(queued_at + chrono::Duration::minutes(30))
        .await;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].request_id, request.request_id);

    assert!(matcher.cancel(&request.request_id).await.unwrap_err().is_benign());
    assert!(matcher.get(&request.request_id).await.is_none());
}
