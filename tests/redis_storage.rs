//! Integration tests for the Redis store and broker.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --test redis_storage -- --ignored`

#![cfg(feature = "redis-storage")]

use admission_relay::infrastructure::mocks::RecordingHandler;
use admission_relay::{
    Broker, BrokerConsumer, BudgetCheck, ClientId, CountingStore, DomainEvent, EventRelay, EventType,
    RateLimiterGate, RedisBrokerConfig, RedisStore, RedisStreamsBroker, Tier, TierPolicy,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisStore::connect(REDIS_URL).await.is_ok()
}

/// Key unique to one test run
fn unique_key(test_name: &str) -> String {
    format!("test:{}:{}", test_name, Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_ping() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {}", REDIS_URL);
        return;
    }

    let store = RedisStore::open(REDIS_URL).unwrap();
    assert!(!store.is_connected());
    store.ping().await.unwrap();
    assert!(store.is_connected());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_check_and_decrement() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = RedisStore::connect(REDIS_URL).await.unwrap();
    let key = unique_key("decrement");
    let window = Duration::from_secs(60);

    let first = store.check_and_decrement(&key, window, 3).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.budget.remaining, 2);
    assert!(first.budget.reset_after <= window);

    store.check_and_decrement(&key, window, 3).await.unwrap();
    let third = store.check_and_decrement(&key, window, 3).await.unwrap();
    assert!(third.allowed);
    assert_eq!(third.budget.remaining, 0);

    // Rejections leave the counter at zero
    for _ in 0..3 {
        let check = store.check_and_decrement(&key, window, 3).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.budget.remaining, 0);
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_window_expires() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = RedisStore::connect(REDIS_URL).await.unwrap();
    let key = unique_key("expiry");
    let window = Duration::from_millis(200);

    assert!(store.check_and_decrement(&key, window, 1).await.unwrap().allowed);
    assert!(!store.check_and_decrement(&key, window, 1).await.unwrap().allowed);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let check: BudgetCheck = store.check_and_decrement(&key, window, 1).await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.budget.remaining, 0);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_budget_shared_between_instances() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let prefix = unique_key("shared");
    let gate = |store: RedisStore| {
        RateLimiterGate::builder(Arc::new(store))
            .with_key_prefix(prefix.clone())
            .with_policy(Tier::Sensitive, TierPolicy::new(2, Duration::from_secs(60)).unwrap())
            .build()
            .unwrap()
    };
    let first = gate(RedisStore::connect(REDIS_URL).await.unwrap());
    let second = gate(RedisStore::connect(REDIS_URL).await.unwrap());
    let client = ClientId::new("203.0.113.9");

    assert!(first.admit(&client, Tier::Sensitive).await.is_allowed());
    assert!(second.admit(&client, Tier::Sensitive).await.is_allowed());
    assert!(!first.admit(&client, Tier::Sensitive).await.is_allowed());
    assert!(!second.admit(&client, Tier::Sensitive).await.is_allowed());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_stream_consumer_group_round_trip() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let mut config = RedisBrokerConfig::for_service(unique_key("group"));
    config.stream_prefix = format!("{}:", unique_key("events"));
    config.block = Duration::from_millis(100);
    let broker = RedisStreamsBroker::open(REDIS_URL, config).unwrap();
    broker.connect().await.unwrap();

    let mut consumer = broker.subscribe(&EventType::POST_DELETED).await.unwrap();

    let event = DomainEvent::new(EventType::POST_DELETED, json!({"postId": "p1"}));
    broker.publish(&event).await.unwrap();

    let delivery = consumer.next_delivery().await.unwrap().unwrap();
    assert_eq!(delivery.event.id(), event.id());
    assert_eq!(delivery.event.payload()["postId"], "p1");
    consumer.ack(&delivery).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_relay_delivers_to_each_service_group() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let prefix = format!("{}:", unique_key("events"));
    let relay_for = |service: &str| {
        let mut config = RedisBrokerConfig::for_service(service);
        config.stream_prefix = prefix.clone();
        config.block = Duration::from_millis(100);
        EventRelay::builder(Arc::new(RedisStreamsBroker::open(REDIS_URL, config).unwrap()))
            .with_connect_delay(Duration::ZERO)
            .build()
            .unwrap()
    };

    let media = relay_for("media-service");
    let search = relay_for("search-service");
    let publisher = relay_for("post-service");

    let media_handler = RecordingHandler::new("media");
    let search_handler = RecordingHandler::new("search");
    media.subscribe(EventType::POST_DELETED, Arc::new(media_handler.clone()));
    search.subscribe(EventType::POST_DELETED, Arc::new(search_handler.clone()));
    media.start();
    search.start();

    // Consumer groups are created at the stream tail; let them exist first
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(publisher
        .publish(EventType::POST_DELETED, &json!({"postId": "p1", "mediaIds": []}))
        .await
        .is_published());

    assert!(media_handler.wait_for(1, Duration::from_secs(5)).await);
    assert!(search_handler.wait_for(1, Duration::from_secs(5)).await);

    media.shutdown().await.unwrap();
    search.shutdown().await.unwrap();
    publisher.shutdown().await.unwrap();
}
