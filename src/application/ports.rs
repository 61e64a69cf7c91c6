//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::budget::BudgetCheck;
use crate::domain::event::{DomainEvent, EventType};
use crate::error::{BrokerError, StoreError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for the shared counting store that holds client budgets.
///
/// Implementations must make check-and-decrement atomic per key: two
/// concurrent calls for the same key can never both take the last point.
/// Infrastructure provides `InMemoryStore` and `RedisStore`.
#[async_trait]
pub trait CountingStore: Send + Sync + Debug {
    /// Consume one point of the budget stored under `key`.
    ///
    /// # Arguments
    /// * `key` - Fully prefixed store key
    /// * `window` - Length of a budget window
    /// * `max_points` - Budget of a fresh window
    ///
    /// # Returns
    /// The check result. A rejected check leaves the budget unchanged.
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        max_points: u32,
    ) -> Result<BudgetCheck, StoreError>;
}

/// An event handed to a consumer, with the broker's id for acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned delivery id (stream entry id, sequence number)
    pub id: String,
    /// The delivered event
    pub event: DomainEvent,
}

/// Port for the message broker.
///
/// Infrastructure provides `InMemoryBroker` and `RedisStreamsBroker`.
#[async_trait]
pub trait Broker: Send + Sync + Debug {
    /// Establish (or verify) the broker connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Hand an event to the broker.
    ///
    /// Returns once the broker accepted the event. Never waits for
    /// subscribers.
    async fn publish(&self, event: &DomainEvent) -> Result<(), BrokerError>;

    /// Open a consumer receiving events of one type published from now on.
    async fn subscribe(&self, event_type: &EventType)
        -> Result<Box<dyn BrokerConsumer>, BrokerError>;
}

/// A stream of deliveries for one event type.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `Ok(None)` once the stream is closed for good.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery so it is not redelivered.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// Subscriber logic for one event type.
///
/// Handlers may see the same event more than once and must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process one event.
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F, Fut> {
    name: String,
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// # Example
/// ```
/// use admission_relay::application::ports::{handler_fn, EventHandler};
///
/// let handler = handler_fn("audit", |event| async move {
///     println!("saw {}", event.event_type());
///     Ok(())
/// });
/// assert_eq!(handler.name(), "audit");
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F, Fut>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}
