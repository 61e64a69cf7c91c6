//! Domain events exchanged between services.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Event type tag, e.g. `post.deleted`.
///
/// Well-known types are `'static` constants; types read off the wire are
/// owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// A post was created.
    pub const POST_CREATED: EventType = EventType(Cow::Borrowed("post.created"));
    /// A post was deleted.
    pub const POST_DELETED: EventType = EventType(Cow::Borrowed("post.deleted"));

    /// Create an event type from any string.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        EventType(name.into())
    }

    /// The type tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for EventType {
    fn from(name: &'static str) -> Self {
        EventType(Cow::Borrowed(name))
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType(Cow::Owned(name))
    }
}

/// Immutable record of something that happened in a service.
///
/// The payload is opaque JSON; subscribers decode it with
/// [`DomainEvent::payload_as`].
///
/// # Example
/// ```
/// use admission_relay::{DomainEvent, EventType};
/// use serde_json::json;
///
/// let event = DomainEvent::new(EventType::POST_DELETED, json!({"postId": "abc"}));
/// assert_eq!(event.event_type().as_str(), "post.deleted");
/// assert_eq!(event.payload()["postId"], "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    id: Uuid,
    event_type: EventType,
    payload: serde_json::Value,
    published_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an event stamped with a fresh id and the current time.
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Unique id, stable across redeliveries.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Type tag.
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Raw payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// When the event was published.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
