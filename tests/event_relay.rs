//! Integration tests for event publishing and background delivery.

use admission_relay::infrastructure::mocks::{HandlerMode, MockCaptureLayer, RecordingHandler};
use admission_relay::services::media::{self, MediaLibrary};
use admission_relay::{
    Backoff, EventRelay, EventType, InMemoryBroker, PublishOutcome, RelayState,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

const WAIT: Duration = Duration::from_secs(5);

fn relay(broker: Arc<InMemoryBroker>) -> EventRelay {
    EventRelay::builder(broker)
        .with_connect_delay(Duration::ZERO)
        .with_handler_timeout(Duration::from_millis(500))
        .with_handler_retry(
            Backoff::new(Duration::from_millis(5), Duration::from_millis(20))
                .unwrap()
                .with_max_attempts(Some(3)),
        )
        .with_reconnect_backoff(
            Backoff::new(Duration::from_millis(5), Duration::from_millis(20)).unwrap(),
        )
        .build()
        .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Start the relay and wait until a consumer for `event_type` is attached.
async fn start_consuming(relay: &EventRelay, broker: &InMemoryBroker, event_type: &EventType) {
    relay.start();
    assert!(
        wait_until(|| broker.consumer_count(event_type) > 0).await,
        "consumer for {} never attached",
        event_type
    );
}

#[tokio::test]
async fn test_publish_without_subscribers_succeeds() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    relay.start();

    let outcome = relay
        .publish(EventType::POST_CREATED, &json!({"postId": "p1"}))
        .await;

    assert!(outcome.is_published());
    assert_eq!(relay.metrics().snapshot().published, 1);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_subscriber_sees_no_earlier_events() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());

    relay.start();
    assert!(wait_until(|| relay.state() == RelayState::Connected).await);

    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "early"}))
        .await;

    let handler = RecordingHandler::new("late");
    relay.subscribe(EventType::POST_DELETED, Arc::new(handler.clone()));
    assert!(wait_until(|| broker.consumer_count(&EventType::POST_DELETED) > 0).await);

    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "late"}))
        .await;

    assert!(handler.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = handler.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload()["postId"], "late");
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_subscriber_skips_queued_events_of_running_consumer() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let slow = RecordingHandler::with_mode("slow", HandlerMode::Sleep(Duration::from_millis(200)));
    relay.subscribe(EventType::POST_DELETED, Arc::new(slow.clone()));
    start_consuming(&relay, &broker, &EventType::POST_DELETED).await;

    // Both events are queued behind the slow handler
    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "e1"}))
        .await;
    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "e2"}))
        .await;

    let late = RecordingHandler::new("late");
    relay.subscribe(EventType::POST_DELETED, Arc::new(late.clone()));

    assert!(slow.wait_for(2, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(late.seen().is_empty());

    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "e3"}))
        .await;
    assert!(late.wait_for(1, WAIT).await);

    let seen = late.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload()["postId"], "e3");
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_of_one_type_arrive_in_publish_order() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let handler = RecordingHandler::new("ordered");
    relay.subscribe(EventType::POST_CREATED, Arc::new(handler.clone()));
    start_consuming(&relay, &broker, &EventType::POST_CREATED).await;

    for n in 0..20 {
        relay.publish(EventType::POST_CREATED, &json!({ "n": n })).await;
    }

    assert!(handler.wait_for(20, WAIT).await);
    let order: Vec<i64> = handler
        .seen()
        .iter()
        .map(|event| event.payload()["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, (0..20).collect::<Vec<_>>());
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handlers_run_in_registration_order() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let journal = Arc::new(Mutex::new(Vec::new()));

    let first = RecordingHandler::new("first").with_journal(journal.clone());
    let second = RecordingHandler::new("second").with_journal(journal.clone());
    relay.subscribe(EventType::POST_DELETED, Arc::new(first));
    relay.subscribe(EventType::POST_DELETED, Arc::new(second.clone()));
    start_consuming(&relay, &broker, &EventType::POST_DELETED).await;

    relay.publish(EventType::POST_DELETED, &json!({"postId": "a"})).await;
    relay.publish(EventType::POST_DELETED, &json!({"postId": "b"})).await;

    assert!(second.wait_for(2, WAIT).await);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["first", "second", "first", "second"]
    );
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_is_retried() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let flaky = RecordingHandler::with_mode("flaky", HandlerMode::FailTimes(2));
    relay.subscribe(EventType::POST_CREATED, Arc::new(flaky.clone()));
    start_consuming(&relay, &broker, &EventType::POST_CREATED).await;

    relay.publish(EventType::POST_CREATED, &json!({"postId": "p1"})).await;

    assert!(flaky.wait_for(1, WAIT).await);
    assert_eq!(flaky.calls(), 3);
    assert!(wait_until(|| broker.acknowledged() == 1).await);

    let metrics = relay.metrics().snapshot();
    assert_eq!(metrics.handler_retries, 2);
    assert_eq!(metrics.handler_failures, 0);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_gives_up_after_attempt_limit() {
    let capture = MockCaptureLayer::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let broken = RecordingHandler::with_mode("broken", HandlerMode::AlwaysFail);
    relay.subscribe(EventType::POST_CREATED, Arc::new(broken.clone()));
    start_consuming(&relay, &broker, &EventType::POST_CREATED).await;

    relay.publish(EventType::POST_CREATED, &json!({"postId": "p1"})).await;

    assert!(wait_until(|| broker.acknowledged() == 1).await);
    assert_eq!(broken.calls(), 3);
    assert_eq!(relay.metrics().snapshot().handler_failures, 1);
    assert!(capture.contains(Level::ERROR, "event handler failed, giving up"));
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_others() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let panicking = RecordingHandler::with_mode("panicking", HandlerMode::Panic);
    let healthy = RecordingHandler::new("healthy");
    relay.subscribe(EventType::POST_DELETED, Arc::new(panicking.clone()));
    relay.subscribe(EventType::POST_DELETED, Arc::new(healthy.clone()));
    start_consuming(&relay, &broker, &EventType::POST_DELETED).await;

    relay.publish(EventType::POST_DELETED, &json!({"postId": "a"})).await;
    relay.publish(EventType::POST_DELETED, &json!({"postId": "b"})).await;

    assert!(healthy.wait_for(2, WAIT).await);
    assert_eq!(panicking.calls(), 6);
    assert_eq!(relay.state(), RelayState::Connected);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    let stuck = RecordingHandler::with_mode("stuck", HandlerMode::Sleep(Duration::from_secs(60)));
    let next = RecordingHandler::new("next");
    relay.subscribe(EventType::POST_CREATED, Arc::new(stuck.clone()));
    relay.subscribe(EventType::POST_CREATED, Arc::new(next.clone()));
    start_consuming(&relay, &broker, &EventType::POST_CREATED).await;

    relay.publish(EventType::POST_CREATED, &json!({"postId": "p1"})).await;

    assert!(next.wait_for(1, WAIT).await);
    assert!(stuck.seen().is_empty());
    assert_eq!(relay.metrics().snapshot().handler_failures, 1);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_broker_at_publish_is_logged_not_raised() {
    let capture = MockCaptureLayer::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    broker.set_available(false);

    let outcome = relay
        .publish(EventType::POST_DELETED, &json!({"id": "abc"}))
        .await;

    assert_eq!(outcome, PublishOutcome::Dropped);
    assert_eq!(relay.metrics().snapshot().publish_failures, 1);

    let errors = capture.events_at(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "failed to publish event");
    assert_eq!(errors[0].field("event_type"), Some("post.deleted"));
}

#[tokio::test]
async fn test_broker_never_reachable_degrades() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.set_available(false);

    let relay = EventRelay::builder(broker.clone())
        .with_connect_delay(Duration::ZERO)
        .with_reconnect_backoff(
            Backoff::new(Duration::from_millis(5), Duration::from_millis(10))
                .unwrap()
                .with_max_attempts(Some(3)),
        )
        .build()
        .unwrap();
    let handler = RecordingHandler::new("never");
    relay.subscribe(EventType::POST_DELETED, Arc::new(handler.clone()));

    relay.start();
    assert!(wait_until(|| relay.state() == RelayState::Degraded).await);
    assert_eq!(broker.consumer_count(&EventType::POST_DELETED), 0);

    // Publishing still returns normally
    let outcome = relay
        .publish(EventType::POST_DELETED, &json!({"postId": "p1"}))
        .await;
    assert_eq!(outcome, PublishOutcome::Dropped);
    assert!(handler.seen().is_empty());

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connects_after_transient_failures() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next_connects(3);

    let relay = relay(broker.clone());
    let handler = RecordingHandler::new("eventually");
    relay.subscribe(EventType::POST_CREATED, Arc::new(handler.clone()));
    start_consuming(&relay, &broker, &EventType::POST_CREATED).await;

    assert_eq!(relay.state(), RelayState::Connected);
    relay.publish(EventType::POST_CREATED, &json!({"postId": "p1"})).await;
    assert!(handler.wait_for(1, WAIT).await);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_after_connect_starts_consumer() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());
    relay.start();
    assert!(wait_until(|| relay.state() == RelayState::Connected).await);

    let handler = RecordingHandler::new("dynamic");
    let id = relay.subscribe(EventType::POST_CREATED, Arc::new(handler.clone()));
    assert!(wait_until(|| broker.consumer_count(&EventType::POST_CREATED) > 0).await);

    relay.publish(EventType::POST_CREATED, &json!({"postId": "p1"})).await;
    assert!(handler.wait_for(1, WAIT).await);

    assert!(relay.unsubscribe(id));
    assert!(!relay.unsubscribe(id));
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_post_deleted_leaves_same_state() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = relay(broker.clone());

    let library = MediaLibrary::new();
    let kept = library.add("alice", "kept.png", "image/png", "https://cdn/kept.png");
    let attached = library.add("alice", "post.png", "image/png", "https://cdn/post.png");
    media::subscribe(&relay, &library);
    start_consuming(&relay, &broker, &EventType::POST_DELETED).await;

    let payload = json!({"postId": "p1", "userId": "alice", "mediaIds": [attached.id]});
    relay.publish(EventType::POST_DELETED, &payload).await;
    relay.publish(EventType::POST_DELETED, &payload).await;

    assert!(wait_until(|| broker.acknowledged() == 2).await);
    assert_eq!(library.all(), vec![kept]);
    assert_eq!(relay.metrics().snapshot().handler_failures, 0);
    relay.shutdown().await.unwrap();
}
