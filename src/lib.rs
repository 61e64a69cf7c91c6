//! # admission-relay
//!
//! Per-client admission control and cross-service event propagation for
//! HTTP microservices.
//!
//! The crate has two cores:
//!
//! - [`RateLimiterGate`]: a two-tier (`global`, `sensitive`) fixed-window
//!   rate limiter keyed by client address, backed by a shared counting store
//!   so several instances of a service enforce one budget.
//! - [`EventRelay`]: a publish/subscribe bridge. Publishing is best-effort
//!   and never fails the request that published; delivery to subscribed
//!   handlers is at-least-once, in the background.
//!
//! Around them sit axum middleware ([`http`]), the post, media and search
//! services ([`services`]) and the bootstrap used by the service binaries
//! ([`server`], [`config`], [`telemetry`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use admission_relay::{ClientId, InMemoryStore, RateLimiterGate, Tier};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // Defaults: global 10 requests per second, sensitive 50 per 15 minutes
//! let gate = RateLimiterGate::builder(Arc::new(InMemoryStore::new()))
//!     .build()
//!     .unwrap();
//!
//! let client = ClientId::new("203.0.113.9");
//! let admission = gate.admit(&client, Tier::Sensitive).await;
//! assert!(admission.is_allowed());
//! # }
//! ```
//!
//! In production the store is Redis, where each check is one atomic Lua
//! script:
//!
//! ```rust,no_run
//! # use admission_relay::{RateLimiterGate, RedisStore};
//! # use std::sync::Arc;
//! let store = RedisStore::open("redis://127.0.0.1:6379/").unwrap();
//! let gate = RateLimiterGate::builder(Arc::new(store)).build().unwrap();
//! ```
//!
//! ## Events
//!
//! ```rust
//! use admission_relay::application::ports::handler_fn;
//! use admission_relay::{EventRelay, EventType, InMemoryBroker};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
//!     .build()
//!     .unwrap();
//!
//! relay.subscribe(
//!     EventType::POST_DELETED,
//!     Arc::new(handler_fn("media-cleanup", |event| async move {
//!         println!("removing media of {}", event.payload()["postId"]);
//!         Ok(())
//!     })),
//! );
//!
//! // Returns at once; the broker connection is made in the background
//! relay.start();
//!
//! // Never fails: a broker outage is logged and reported as `Dropped`
//! let outcome = relay.publish(EventType::POST_DELETED, &json!({"postId": "abc"})).await;
//! # let _ = outcome;
//! # relay.shutdown().await.unwrap();
//! # }
//! ```
//!
//! Handlers run in registration order, one delivery at a time per event
//! type. A handler that fails, panics or times out is retried with
//! exponential backoff, then logged and skipped; the delivery is
//! acknowledged only after every handler ran. Handlers must therefore be
//! idempotent.
//!
//! ## HTTP
//!
//! [`http::enforce_admission`] applies one tier to a router or a route.
//! Rejections are `429` with `{"success":false,"message":"Too many requests"}`
//! and `Retry-After`; sensitive routes also carry `RateLimit-Limit`,
//! `RateLimit-Remaining` and `RateLimit-Reset`.
//!
//! ## Fail-Safe Operation
//!
//! When the counting store fails, the gate applies one [`FailurePolicy`] to
//! every tier: `Open` (default) admits and logs a warning, `Closed` rejects
//! with `503`. A circuit breaker stops calling a store that keeps failing and
//! probes it again after a recovery timeout:
//!
//! ```rust
//! # use admission_relay::{CircuitState, InMemoryStore, RateLimiterGate};
//! # use std::sync::Arc;
//! # let gate = RateLimiterGate::builder(Arc::new(InMemoryStore::new())).build().unwrap();
//! match gate.circuit_state() {
//!     CircuitState::Closed => println!("store healthy"),
//!     CircuitState::Open => println!("store down, failure policy applies"),
//!     CircuitState::HalfOpen => println!("probing the store"),
//! }
//! ```
//!
//! If the broker is unreachable the relay keeps retrying in the background
//! (or, with an attempt limit, settles in [`RelayState::Degraded`]); HTTP
//! serving is never blocked on it.
//!
//! ## Features
//!
//! - `redis-storage` (default): [`RedisStore`], [`RedisStreamsBroker`] and
//!   the service binaries.
//! - `test-helpers`: mocks under `infrastructure::mocks` (clock, failing
//!   stores, recording handlers, log capture).

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod services;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use domain::{
    budget::{BudgetCheck, BudgetSnapshot, ClientBudget},
    event::{DomainEvent, EventType},
    key::{BudgetKey, ClientId},
    tier::{PolicyError, Tier, TierPolicies, TierPolicy},
};

pub use application::{
    backoff::Backoff,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    gate::{Admission, FailurePolicy, RateLimiterGate, RateLimiterGateBuilder, RejectReason, Rejection},
    metrics::{GateMetrics, GateMetricsSnapshot, RelayMetrics, RelayMetricsSnapshot},
    ports::{Broker, BrokerConsumer, Clock, CountingStore, Delivery, EventHandler},
    registry::{HandlerId, SubscriptionRegistry},
    relay::{EventRelay, EventRelayBuilder, PublishOutcome, RelayConfig, RelayState},
};

pub use error::{BrokerError, BuildError, HandlerFailure, ShutdownError, StoreError};

pub use infrastructure::{clock::SystemClock, memory_broker::InMemoryBroker, memory_store::InMemoryStore};

#[cfg(feature = "redis-storage")]
pub use infrastructure::{
    redis_broker::{RedisBrokerConfig, RedisStreamsBroker},
    redis_store::RedisStore,
};
