//! The three services in one process, wired through an in-memory broker.
//!
//! A post is created and deleted through the post service router; the
//! search and media services pick up the events in the background.

use admission_relay::services::media::{self, MediaLibrary};
use admission_relay::services::posts::{self, PostRepository};
use admission_relay::services::search::{self, SearchIndex};
use admission_relay::services::ServiceContext;
use admission_relay::{EventRelay, InMemoryBroker, InMemoryStore, RateLimiterGate};
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> anyhow::Result<Value> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "alice")
        .header(header::CONTENT_TYPE, "application/json");
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let mut req = builder.body(body)?;
    req.extensions_mut()
        .insert(ConnectInfo("127.0.0.1:50000".parse::<SocketAddr>()?));

    let response = app.clone().oneshot(req).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value: Value = serde_json::from_slice(&bytes)?;
    println!("  {} {} -> {}", status.as_u16(), uri, value);
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("admission_relay=info")
        .init();

    println!("=== Event Relay Example ===\n");

    let broker = Arc::new(InMemoryBroker::new());
    let relay = |connect_delay: Duration| {
        EventRelay::builder(broker.clone())
            .with_connect_delay(connect_delay)
            .build()
    };
    let gate = RateLimiterGate::builder(Arc::new(InMemoryStore::new())).build()?;

    let post_relay = relay(Duration::ZERO)?;
    let media_relay = relay(Duration::from_millis(200))?;
    let search_relay = relay(Duration::from_millis(200))?;

    let library = MediaLibrary::new();
    let index = SearchIndex::new();
    media::subscribe(&media_relay, &library);
    search::subscribe(&search_relay, &index);

    let posts_app = posts::router(
        ServiceContext::new("post-service", 3002, gate.clone(), post_relay.clone()),
        PostRepository::new(),
    );
    let search_app = search::router(
        ServiceContext::new("search-service", 3004, gate.clone(), search_relay.clone()),
        index.clone(),
    );

    for relay in [&post_relay, &media_relay, &search_relay] {
        relay.start();
    }

    println!("Health while consumers are still connecting:");
    call(&search_app, Method::GET, "/api/search/health", None).await?;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let photo = library.add("alice", "beach.jpg", "image/jpeg", "https://cdn.example.com/beach.jpg");
    println!("\nMedia library holds {} item(s)", library.len());

    println!("\nCreate a post:");
    let created = call(
        &posts_app,
        Method::POST,
        "/api/posts",
        Some(json!({"content": "A day at the beach", "mediaIds": [photo.id]})),
    )
    .await?;
    let post_id = created["post"]["id"].as_str().unwrap_or_default().to_string();

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("\nSearch after post.created:");
    call(&search_app, Method::GET, "/api/search/posts?query=beach", None).await?;

    println!("\nDelete the post:");
    call(&posts_app, Method::DELETE, &format!("/api/posts/{}", post_id), None).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("\nSearch after post.deleted:");
    call(&search_app, Method::GET, "/api/search/posts?query=beach", None).await?;
    println!("\nMedia library holds {} item(s)", library.len());

    for relay in [post_relay, media_relay, search_relay] {
        relay.shutdown().await?;
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
