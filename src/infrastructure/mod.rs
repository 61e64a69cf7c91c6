//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Counting stores (in-memory DashMap, Redis Lua script)
//! - Message brokers (in-memory broadcast, Redis Streams)

pub mod clock;
pub mod memory_broker;
pub mod memory_store;

#[cfg(feature = "redis-storage")]
pub mod redis_broker;
#[cfg(feature = "redis-storage")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides controllable test doubles for stores,
/// handlers, time and logs.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// admission-relay = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
