//! Integration tests for relay shutdown.

use admission_relay::infrastructure::mocks::{HandlerMode, RecordingHandler};
use admission_relay::{
    Backoff, EventRelay, EventType, InMemoryBroker, PublishOutcome, RelayState, ShutdownError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_shutdown_before_start() {
    let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
        .build()
        .unwrap();

    relay.shutdown().await.unwrap();
    assert_eq!(relay.state(), RelayState::Stopped);

    // A stopped relay cannot be restarted
    relay.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_shutdown_during_connect_delay_is_prompt() {
    let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
        .with_connect_delay(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    relay.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = std::time::Instant::now();
    relay.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_shutdown_releases_idle_consumers() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = EventRelay::builder(broker.clone())
        .with_connect_delay(Duration::ZERO)
        .build()
        .unwrap();
    relay.subscribe(EventType::POST_CREATED, Arc::new(RecordingHandler::new("a")));
    relay.subscribe(EventType::POST_DELETED, Arc::new(RecordingHandler::new("b")));

    relay.start();
    assert!(
        wait_until(|| {
            broker.consumer_count(&EventType::POST_CREATED) == 1
                && broker.consumer_count(&EventType::POST_DELETED) == 1
        })
        .await
    );

    relay.shutdown().await.unwrap();
    assert_eq!(broker.consumer_count(&EventType::POST_CREATED), 0);
    assert_eq!(broker.consumer_count(&EventType::POST_DELETED), 0);
}

#[tokio::test]
async fn test_publish_after_shutdown_is_dropped() {
    let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
        .build()
        .unwrap();
    relay.shutdown().await.unwrap();

    let outcome = relay
        .publish(EventType::POST_CREATED, &json!({"postId": "p1"}))
        .await;
    assert_eq!(outcome, PublishOutcome::Dropped);
    assert_eq!(relay.metrics().snapshot().publish_failures, 1);
}

#[tokio::test]
async fn test_stuck_handler_is_aborted_after_timeout() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = EventRelay::builder(broker.clone())
        .with_connect_delay(Duration::ZERO)
        .with_handler_timeout(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let stuck = RecordingHandler::with_mode("stuck", HandlerMode::Sleep(Duration::from_secs(30)));
    relay.subscribe(EventType::POST_CREATED, Arc::new(stuck.clone()));

    relay.start();
    assert!(wait_until(|| broker.consumer_count(&EventType::POST_CREATED) == 1).await);
    relay
        .publish(EventType::POST_CREATED, &json!({"postId": "p1"}))
        .await;
    assert!(wait_until(|| stuck.calls() == 1).await);

    match relay.shutdown().await {
        Err(ShutdownError::Timeout { pending, timeout }) => {
            assert_eq!(pending, 1);
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected a shutdown timeout, got {:?}", other),
    }
    assert_eq!(broker.acknowledged(), 0);
}

#[tokio::test]
async fn test_shutdown_during_retry_leaves_delivery_unacknowledged() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = EventRelay::builder(broker.clone())
        .with_connect_delay(Duration::ZERO)
        .with_handler_retry(
            Backoff::new(Duration::from_secs(30), Duration::from_secs(60))
                .unwrap()
                .with_max_attempts(Some(5)),
        )
        .build()
        .unwrap();
    let failing = RecordingHandler::with_mode("failing", HandlerMode::AlwaysFail);
    relay.subscribe(EventType::POST_DELETED, Arc::new(failing.clone()));

    relay.start();
    assert!(wait_until(|| broker.consumer_count(&EventType::POST_DELETED) == 1).await);
    relay
        .publish(EventType::POST_DELETED, &json!({"postId": "p1"}))
        .await;
    assert!(wait_until(|| failing.calls() == 1).await);

    relay.shutdown().await.unwrap();
    assert_eq!(failing.calls(), 1);
    assert_eq!(broker.acknowledged(), 0);
}
