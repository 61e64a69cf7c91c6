//! In-process broker.
//!
//! One `tokio::sync::broadcast` channel per event type. Every consumer of a
//! type gets every event published after it subscribed; events published
//! with no consumer are dropped. Suitable for single-process deployments and
//! tests; services that run as separate processes use `RedisStreamsBroker`.
//!
//! The broker can be switched unavailable to exercise outage handling.

use crate::application::ports::{Broker, BrokerConsumer, Delivery};
use crate::domain::event::{DomainEvent, EventType};
use crate::error::BrokerError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-type channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broker backed by broadcast channels.
#[derive(Debug)]
pub struct InMemoryBroker {
    channels: DashMap<EventType, broadcast::Sender<Delivery>>,
    capacity: usize,
    available: AtomicBool,
    failing_connects: AtomicU32,
    sequence: AtomicU64,
    acknowledged: Arc<AtomicU64>,
}

impl InMemoryBroker {
    /// Create a broker with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broker whose channels buffer up to `capacity` events.
    ///
    /// Consumers lagging further behind skip the oldest events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
            failing_connects: AtomicU32::new(0),
            sequence: AtomicU64::new(0),
            acknowledged: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `attempts` connection attempts fail.
    pub fn fail_next_connects(&self, attempts: u32) {
        self.failing_connects.store(attempts, Ordering::SeqCst);
    }

    /// Close every channel. Open consumers see the end of their stream.
    pub fn close(&self) {
        self.channels.clear();
    }

    /// Number of open consumers for an event type.
    pub fn consumer_count(&self, event_type: &EventType) -> usize {
        self.channels
            .get(event_type)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Total deliveries acknowledged by consumers.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker switched off".to_string()))
        }
    }

    fn sender(&self, event_type: &EventType) -> broadcast::Sender<Delivery> {
        self.channels
            .entry(event_type.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let failing = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        self.check_available()
    }

    async fn publish(&self, event: &DomainEvent) -> Result<(), BrokerError> {
        self.check_available()?;

        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Delivery {
            id: id.to_string(),
            event: event.clone(),
        };

        match self.sender(event.event_type()).send(delivery) {
            Ok(receivers) => {
                debug!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    receivers,
                    "event broadcast"
                );
            }
            Err(_) => {
                debug!(
                    event_type = %event.event_type(),
                    event_id = %event.id(),
                    "event dropped (no consumers)"
                );
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &EventType,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        self.check_available()?;

        Ok(Box::new(InMemoryConsumer {
            event_type: event_type.clone(),
            receiver: self.sender(event_type).subscribe(),
            acknowledged: Arc::clone(&self.acknowledged),
        }))
    }
}

struct InMemoryConsumer {
    event_type: EventType,
    receiver: broadcast::Receiver<Delivery>,
    acknowledged: Arc<AtomicU64>,
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(event_type = %self.event_type, skipped, "consumer lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), BrokerError> {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
