//! Registry of event handlers.
//!
//! Maps each event type to an ordered list of handler registrations. A
//! registration made while events of its type may already be in flight
//! carries a `since` timestamp; events published before it are skipped for
//! that handler.

use crate::application::ports::EventHandler;
use crate::domain::event::{DomainEvent, EventType};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifier returned by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Raw id value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A registered handler.
#[derive(Clone)]
pub struct Registration {
    /// Id assigned at registration
    pub id: HandlerId,
    /// The handler
    pub handler: Arc<dyn EventHandler>,
    /// Earliest publish time this handler accepts, if any
    pub since: Option<DateTime<Utc>>,
}

impl Registration {
    /// Check if `event` was published at or after this registration.
    pub fn accepts(&self, event: &DomainEvent) -> bool {
        self.since.map_or(true, |since| event.published_at() >= since)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("handler", &self.handler.name())
            .field("since", &self.since)
            .finish()
    }
}

/// Event type to handler mapping, shared between clones.
///
/// # Example
/// ```
/// use admission_relay::application::ports::handler_fn;
/// use admission_relay::application::registry::SubscriptionRegistry;
/// use admission_relay::EventType;
/// use std::sync::Arc;
///
/// let registry = SubscriptionRegistry::new();
/// let first = registry.register(
///     EventType::POST_DELETED,
///     Arc::new(handler_fn("media", |_| async { Ok(()) })),
/// );
/// let second = registry.register(
///     EventType::POST_DELETED,
///     Arc::new(handler_fn("search", |_| async { Ok(()) })),
/// );
///
/// assert_eq!(registry.handler_ids(&EventType::POST_DELETED), vec![first, second]);
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<RwLock<BTreeMap<EventType, Vec<Registration>>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event_type`.
    pub fn register(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.register_since(event_type, handler, None)
    }

    /// Append a handler that only accepts events published at or after `since`.
    pub fn register_since(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        since: Option<DateTime<Utc>>,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.write()
            .entry(event_type)
            .or_default()
            .push(Registration { id, handler, since });
        id
    }

    /// Remove a handler. Returns `false` if the id was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.write();
        let mut removed = false;

        handlers.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });

        removed
    }

    /// Handlers for `event_type`, in registration order.
    pub fn handlers_for(&self, event_type: &EventType) -> Vec<Registration> {
        self.read().get(event_type).cloned().unwrap_or_default()
    }

    /// Handler ids for `event_type`, in registration order.
    pub fn handler_ids(&self, event_type: &EventType) -> Vec<HandlerId> {
        self.read()
            .get(event_type)
            .map(|registrations| registrations.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }

    /// Event types with at least one handler.
    pub fn event_types(&self) -> Vec<EventType> {
        self.read().keys().cloned().collect()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking writer cannot leave the map half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EventType, Vec<Registration>>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EventType, Vec<Registration>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.read().iter()).finish()
    }
}
