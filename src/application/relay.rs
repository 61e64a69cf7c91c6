//! Publish/subscribe bridge between services.
//!
//! Publishing is best effort: the event is handed to the broker under a
//! timeout and any failure is logged, never returned to the caller.
//! Consumption runs in background tasks, one per event type, that dispatch
//! deliveries sequentially and acknowledge them only after every handler ran.
//!
//! The broker connection is owned by a supervisor task started with
//! [`EventRelay::start`]. It waits for an optional initial delay, then
//! connects with exponential backoff. If the attempts run out the relay
//! stays up in [`RelayState::Degraded`] mode: publishing keeps trying the
//! broker, but nothing is consumed.

use crate::application::backoff::Backoff;
use crate::application::metrics::RelayMetrics;
use crate::application::ports::{Broker, BrokerConsumer, Delivery, EventHandler};
use crate::application::registry::{HandlerId, Registration, SubscriptionRegistry};
use crate::domain::event::{DomainEvent, EventType};
use crate::error::{BrokerError, BuildError, HandlerFailure, ShutdownError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Connection lifecycle of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    /// Not started yet
    Idle = 0,
    /// Supervisor is trying to reach the broker
    Connecting = 1,
    /// Broker reachable, consumers running
    Connected = 2,
    /// Broker never became reachable; events are not consumed
    Degraded = 3,
    /// Shut down
    Stopped = 4,
}

impl From<u8> for RelayState {
    fn from(value: u8) -> Self {
        match value {
            1 => RelayState::Connecting,
            2 => RelayState::Connected,
            3 => RelayState::Degraded,
            4 => RelayState::Stopped,
            _ => RelayState::Idle,
        }
    }
}

impl RelayState {
    /// Lowercase name, as reported by health endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Idle => "idle",
            RelayState::Connecting => "connecting",
            RelayState::Connected => "connected",
            RelayState::Degraded => "degraded",
            RelayState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a publish call. Neither variant is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker accepted the event
    Published {
        /// Id of the published event
        event_id: Uuid,
    },
    /// The event was dropped and the failure logged
    Dropped,
}

impl PublishOutcome {
    /// Whether the broker accepted the event.
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Timeouts and retry schedules of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Wait before the first connection attempt
    pub connect_delay: Duration,
    /// Bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Schedule of connection attempts
    pub reconnect: Backoff,
    /// Bound on handing one event to the broker
    pub publish_timeout: Duration,
    /// Bound on one handler invocation
    pub handler_timeout: Duration,
    /// Schedule of handler retries
    pub handler_retry: Backoff,
    /// Bound on stopping background tasks
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            reconnect: Backoff::reconnect_default(),
            publish_timeout: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(30),
            handler_retry: Backoff::handler_default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Publish/subscribe bridge over a [`Broker`].
///
/// Cheap to clone; clones share the registry, tasks and metrics.
///
/// # Example
/// ```
/// use admission_relay::application::ports::handler_fn;
/// use admission_relay::{EventRelay, EventType, InMemoryBroker};
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
///     .with_connect_delay(Duration::ZERO)
///     .build()
///     .unwrap();
///
/// relay.subscribe(
///     EventType::POST_DELETED,
///     Arc::new(handler_fn("cleanup", |event| async move {
///         println!("post deleted: {}", event.payload());
///         Ok(())
///     })),
/// );
/// relay.start();
///
/// relay.publish(EventType::POST_DELETED, &json!({"postId": "abc"})).await;
/// relay.shutdown().await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct EventRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    broker: Arc<dyn Broker>,
    registry: SubscriptionRegistry,
    config: RelayConfig,
    state: AtomicU8,
    started: AtomicBool,
    metrics: RelayMetrics,
    shutdown: watch::Sender<bool>,
    consumers: Mutex<HashSet<EventType>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRelay")
            .field("broker", &self.inner.broker)
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl EventRelay {
    /// Create a builder around a broker.
    ///
    /// Defaults are those of [`RelayConfig::default`]: a 2 second connect
    /// delay, reconnecting forever from 500ms up to 30s, 1 second publish
    /// timeout and 3 handler attempts.
    pub fn builder(broker: Arc<dyn Broker>) -> EventRelayBuilder {
        EventRelayBuilder {
            broker,
            registry: None,
            config: RelayConfig::default(),
        }
    }

    /// Hand an event to the broker.
    ///
    /// Never fails: broker errors, timeouts and payload encoding errors are
    /// logged at ERROR and reported as [`PublishOutcome::Dropped`]. Does not
    /// wait for subscribers.
    pub async fn publish<P>(&self, event_type: EventType, payload: &P) -> PublishOutcome
    where
        P: Serialize + ?Sized,
    {
        let inner = &self.inner;

        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                inner.metrics.record_publish_failure();
                tracing::error!(%event_type, error = %e, "failed to encode event payload");
                return PublishOutcome::Dropped;
            }
        };

        if self.state() == RelayState::Stopped {
            inner.metrics.record_publish_failure();
            tracing::error!(%event_type, error = %BrokerError::Closed, "failed to publish event");
            return PublishOutcome::Dropped;
        }

        let event = DomainEvent::new(event_type, payload);
        let timeout = inner.config.publish_timeout;

        let result = match tokio::time::timeout(timeout, inner.broker.publish(&event)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                inner.metrics.record_published();
                tracing::debug!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    "event published"
                );
                PublishOutcome::Published {
                    event_id: event.id(),
                }
            }
            Err(error) => {
                inner.metrics.record_publish_failure();
                tracing::error!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    %error,
                    "failed to publish event"
                );
                PublishOutcome::Dropped
            }
        }
    }

    /// Register a handler for an event type.
    ///
    /// The handler receives events published after this call; there is no
    /// replay of earlier events. When a consumer for `event_type` is already
    /// running, deliveries still queued from before this call are skipped
    /// for this handler.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> HandlerId {
        let name = handler.name().to_string();
        let consuming = self.inner.consumers().contains(&event_type);
        let since = consuming.then(Utc::now);
        let id = self
            .inner
            .registry
            .register_since(event_type.clone(), handler, since);

        tracing::info!(%event_type, handler = %name, handler_id = %id, "handler subscribed");

        if self.state() == RelayState::Connected {
            ensure_consumer(&self.inner, event_type);
        }

        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Start the connection supervisor.
    ///
    /// Returns immediately; connecting happens in the background. Calling
    /// it again has no effect. Must be called within a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.state() == RelayState::Stopped {
            return;
        }

        let handle = tokio::spawn(supervise(Arc::clone(&self.inner)));
        self.inner.tasks().push(handle);
    }

    /// Stop the supervisor and every consumer task.
    ///
    /// A delivery being dispatched is finished first; tasks still running
    /// after the shutdown timeout are aborted.
    ///
    /// # Errors
    /// Returns `ShutdownError::Timeout` if tasks had to be aborted, or
    /// `ShutdownError::TaskPanicked` if one of them panicked.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let inner = &self.inner;
        inner
            .state
            .store(RelayState::Stopped as u8, Ordering::SeqCst);
        inner.shutdown.send_replace(true);

        let handles = std::mem::take(&mut *inner.tasks());
        let total = handles.len();
        let timeout = inner.config.shutdown_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let mut pending = 0;
        let mut panicked = None;

        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => panicked = Some(e.to_string()),
                Ok(Err(_)) => {}
                Err(_) => {
                    handle.abort();
                    pending += 1;
                }
            }
        }

        if pending > 0 {
            tracing::warn!(pending, tasks = total, "event relay tasks aborted on shutdown");
            return Err(ShutdownError::Timeout { pending, timeout });
        }
        if let Some(message) = panicked {
            return Err(ShutdownError::TaskPanicked(message));
        }

        tracing::info!(tasks = total, "event relay stopped");
        Ok(())
    }

    /// Current connection state.
    pub fn state(&self) -> RelayState {
        self.inner.state()
    }

    /// Relay counters.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.inner.metrics
    }

    /// Handler registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }
}

impl RelayInner {
    fn state(&self) -> RelayState {
        RelayState::from(self.state.load(Ordering::SeqCst))
    }

    /// Move to `to` unless the relay has been stopped.
    fn transition(&self, to: RelayState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != RelayState::Stopped as u8).then_some(to as u8)
            })
            .is_ok()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn consumers(&self) -> MutexGuard<'_, HashSet<EventType>> {
        self.consumers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run every handler of the delivery's type, in registration order.
    ///
    /// Returns `false` if shutdown interrupted a retry; the delivery must
    /// then stay unacknowledged.
    async fn dispatch(&self, delivery: &Delivery, shutdown: &mut watch::Receiver<bool>) -> bool {
        let event = &delivery.event;
        let registrations = self.registry.handlers_for(event.event_type());

        if registrations.is_empty() {
            tracing::debug!(
                event_type = %event.event_type(),
                event_id = %event.id(),
                "no handlers for event"
            );
        }

        for registration in &registrations {
            if !registration.accepts(event) {
                tracing::debug!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    handler = registration.handler.name(),
                    "skipping event published before subscription"
                );
                continue;
            }
            if !self.run_handler(registration, event, shutdown).await {
                return false;
            }
        }

        self.metrics.record_delivered();
        true
    }

    async fn run_handler(
        &self,
        registration: &Registration,
        event: &DomainEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let retry = &self.config.handler_retry;
        let name = registration.handler.name();
        let mut attempt = 1;

        loop {
            let result = invoke(
                Arc::clone(&registration.handler),
                event.clone(),
                self.config.handler_timeout,
            )
            .await;

            let failure = match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(
                            event_type = %event.event_type(),
                            event_id = %event.id(),
                            handler = name,
                            attempt,
                            "event handler succeeded after retry"
                        );
                    }
                    return true;
                }
                Err(failure) => failure,
            };

            if !retry.allows_attempt(attempt + 1) {
                self.metrics.record_handler_failure();
                tracing::error!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    handler = name,
                    attempts = attempt,
                    error = %failure,
                    "event handler failed, giving up"
                );
                return true;
            }

            let delay = retry.delay_for(attempt);
            self.metrics.record_handler_retry();
            tracing::warn!(
                event_type = %event.event_type(),
                event_id = %event.id(),
                handler = name,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %failure,
                "event handler failed, retrying"
            );

            tokio::select! {
                _ = stopped(shutdown) => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Run one handler invocation in its own task so a panic or a hang stays
/// contained.
async fn invoke(
    handler: Arc<dyn EventHandler>,
    event: DomainEvent,
    timeout: Duration,
) -> Result<(), HandlerFailure> {
    let mut task = tokio::spawn(async move { handler.handle(&event).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(HandlerFailure::Failed(format!("{:#}", e))),
        Ok(Err(e)) if e.is_panic() => Err(HandlerFailure::Panicked),
        Ok(Err(e)) => Err(HandlerFailure::Failed(e.to_string())),
        Err(_) => {
            task.abort();
            Err(HandlerFailure::TimedOut(timeout))
        }
    }
}

/// Resolves once shutdown has been requested.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn supervise(inner: Arc<RelayInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let config = inner.config.clone();

    if !config.connect_delay.is_zero() {
        tokio::select! {
            _ = stopped(&mut shutdown) => return,
            _ = tokio::time::sleep(config.connect_delay) => {}
        }
    }

    if !inner.transition(RelayState::Connecting) {
        return;
    }

    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = stopped(&mut shutdown) => return,
            result = tokio::time::timeout(config.connect_timeout, inner.broker.connect()) => result,
        };
        let result = result.unwrap_or(Err(BrokerError::Timeout(config.connect_timeout)));

        match result {
            Ok(()) => {
                if !inner.transition(RelayState::Connected) {
                    return;
                }
                tracing::info!(attempt, "connected to message broker");

                for event_type in inner.registry.event_types() {
                    ensure_consumer(&inner, event_type);
                }
                return;
            }
            Err(error) => {
                if !config.reconnect.allows_attempt(attempt + 1) {
                    inner.transition(RelayState::Degraded);
                    tracing::error!(
                        attempts = attempt,
                        %error,
                        "message broker unreachable, continuing without event consumption"
                    );
                    return;
                }

                let delay = config.reconnect.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    %error,
                    "failed to connect to message broker, retrying"
                );

                tokio::select! {
                    _ = stopped(&mut shutdown) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Spawn the consumer task for `event_type` unless one is already running.
fn ensure_consumer(inner: &Arc<RelayInner>, event_type: EventType) {
    if inner.state() == RelayState::Stopped {
        return;
    }
    if !inner.consumers().insert(event_type.clone()) {
        return;
    }

    let handle = tokio::spawn(consume(Arc::clone(inner), event_type));
    inner.tasks().push(handle);
}

enum ConsumerExit {
    Shutdown,
    Closed,
    Failed(BrokerError),
}

async fn consume(inner: Arc<RelayInner>, event_type: EventType) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut attempt = 1;

    loop {
        let subscription = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            subscription = inner.broker.subscribe(&event_type) => subscription,
        };

        let error = match subscription {
            Ok(consumer) => {
                tracing::info!(%event_type, "consuming events");
                match drain(&inner, consumer, &mut shutdown).await {
                    ConsumerExit::Shutdown => break,
                    ConsumerExit::Closed => {
                        tracing::info!(%event_type, "event stream closed");
                        break;
                    }
                    ConsumerExit::Failed(error) => {
                        attempt = 1;
                        error
                    }
                }
            }
            Err(error) => error,
        };

        if !inner.config.reconnect.allows_attempt(attempt + 1) {
            tracing::error!(%event_type, attempts = attempt, %error, "event consumer giving up");
            break;
        }

        let delay = inner.config.reconnect.delay_for(attempt);
        tracing::warn!(
            %event_type,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            %error,
            "event consumer failed, resubscribing"
        );

        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }

    inner.consumers().remove(&event_type);
}

async fn drain(
    inner: &RelayInner,
    mut consumer: Box<dyn BrokerConsumer>,
    shutdown: &mut watch::Receiver<bool>,
) -> ConsumerExit {
    loop {
        let next = tokio::select! {
            biased;
            _ = stopped(shutdown) => return ConsumerExit::Shutdown,
            next = consumer.next_delivery() => next,
        };

        let delivery = match next {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return ConsumerExit::Closed,
            Err(error) => return ConsumerExit::Failed(error),
        };

        if !inner.dispatch(&delivery, shutdown).await {
            return ConsumerExit::Shutdown;
        }

        if let Err(error) = consumer.ack(&delivery).await {
            tracing::warn!(
                event_type = %delivery.event.event_type(),
                event_id = %delivery.event.id(),
                delivery_id = %delivery.id,
                %error,
                "failed to acknowledge delivery"
            );
        }
    }
}

/// Builder for [`EventRelay`].
pub struct EventRelayBuilder {
    broker: Arc<dyn Broker>,
    registry: Option<SubscriptionRegistry>,
    config: RelayConfig,
}

impl EventRelayBuilder {
    /// Replace the whole configuration.
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing handler registry.
    pub fn with_registry(mut self, registry: SubscriptionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wait before the first connection attempt.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.config.connect_delay = delay;
        self
    }

    /// Bound each connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Schedule of connection attempts.
    pub fn with_reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.config.reconnect = backoff;
        self
    }

    /// Bound each publish.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.config.publish_timeout = timeout;
        self
    }

    /// Bound each handler invocation.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    /// Schedule of handler retries.
    pub fn with_handler_retry(mut self, backoff: Backoff) -> Self {
        self.config.handler_retry = backoff;
        self
    }

    /// Bound on stopping background tasks.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the relay. It does nothing until [`EventRelay::start`].
    ///
    /// # Errors
    /// Returns `BuildError::ZeroTimeout` if any timeout is zero.
    pub fn build(self) -> Result<EventRelay, BuildError> {
        let config = self.config;
        let timeouts = [
            ("connect_timeout", config.connect_timeout),
            ("publish_timeout", config.publish_timeout),
            ("handler_timeout", config.handler_timeout),
            ("shutdown_timeout", config.shutdown_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(BuildError::ZeroTimeout(*name));
        }

        let (shutdown, _) = watch::channel(false);

        Ok(EventRelay {
            inner: Arc::new(RelayInner {
                broker: self.broker,
                registry: self.registry.unwrap_or_default(),
                config,
                state: AtomicU8::new(RelayState::Idle as u8),
                started: AtomicBool::new(false),
                metrics: RelayMetrics::new(),
                shutdown,
                consumers: Mutex::new(HashSet::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::handler_fn;
    use crate::infrastructure::memory_broker::InMemoryBroker;
    use serde_json::json;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            RelayState::Idle,
            RelayState::Connecting,
            RelayState::Connected,
            RelayState::Degraded,
            RelayState::Stopped,
        ] {
            assert_eq!(RelayState::from(state as u8), state);
        }
        assert_eq!(RelayState::Degraded.to_string(), "degraded");
        assert_eq!(
            serde_json::to_value(RelayState::Connected).unwrap(),
            json!("connected")
        );
    }

    #[test]
    fn test_builder_rejects_zero_timeouts() {
        let result = EventRelay::builder(Arc::new(InMemoryBroker::new()))
            .with_publish_timeout(Duration::ZERO)
            .build();
        assert_eq!(result.unwrap_err(), BuildError::ZeroTimeout("publish_timeout"));
    }

    #[tokio::test]
    async fn test_invoke_contains_failures() {
        let event = DomainEvent::new(EventType::POST_CREATED, json!({}));

        let ok: Arc<dyn EventHandler> = Arc::new(handler_fn("ok", |_| async { Ok(()) }));
        assert_eq!(invoke(ok, event.clone(), Duration::from_secs(1)).await, Ok(()));

        let failing: Arc<dyn EventHandler> =
            Arc::new(handler_fn("failing", |_| async { Err(anyhow::anyhow!("boom")) }));
        assert_eq!(
            invoke(failing, event.clone(), Duration::from_secs(1)).await,
            Err(HandlerFailure::Failed("boom".to_string()))
        );

        let panicking: Arc<dyn EventHandler> = Arc::new(handler_fn("panicking", |_| async {
            panic!("handler bug");
        }));
        assert_eq!(
            invoke(panicking, event.clone(), Duration::from_secs(1)).await,
            Err(HandlerFailure::Panicked)
        );

        let slow: Arc<dyn EventHandler> = Arc::new(handler_fn("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));
        assert_eq!(
            invoke(slow, event, Duration::from_millis(20)).await,
            Err(HandlerFailure::TimedOut(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let relay = EventRelay::builder(Arc::new(InMemoryBroker::new()))
            .with_connect_delay(Duration::ZERO)
            .build()
            .unwrap();

        relay.start();
        relay.start();
        assert_eq!(relay.inner.tasks().len(), 1);

        relay.shutdown().await.unwrap();
        assert_eq!(relay.state(), RelayState::Stopped);
    }
}
