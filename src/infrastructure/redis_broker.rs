//! Redis Streams broker.
//!
//! ## Layout
//!
//! - One stream per event type: `{stream_prefix}{event_type}`
//! - One consumer group per subscribing service, created at `$` so a new
//!   group only sees events published after it subscribed
//! - Entries carry a single field, `event`, holding the JSON-encoded
//!   `DomainEvent`
//!
//! ## Delivery
//!
//! A consumer first drains its own pending entries (delivered earlier but
//! never acknowledged, e.g. after a crash), then reads new entries with
//! `XREADGROUP ... >`. Entries are acknowledged with `XACK` after the relay
//! ran every handler, which gives at-least-once delivery per group.
//!
//! Entries that cannot be decoded are logged and acknowledged so they do
//! not block the stream.

use crate::application::ports::{Broker, BrokerConsumer, Delivery};
use crate::domain::event::{DomainEvent, EventType};
use crate::error::BrokerError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const EVENT_FIELD: &str = "event";

/// Configuration for the Redis Streams broker.
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    /// Prefix of stream keys (default: "events:")
    pub stream_prefix: String,
    /// Consumer group, normally the service name
    pub group: String,
    /// Consumer name within the group (default: the group name)
    pub consumer: String,
    /// How long one `XREADGROUP` blocks waiting for entries
    pub block: Duration,
    /// Entries fetched per read
    pub batch_size: usize,
    /// Approximate cap on stream length (`None` keeps everything)
    pub max_len: Option<usize>,
}

impl RedisBrokerConfig {
    /// Configuration for a service's consumer group.
    pub fn for_service(service: impl Into<String>) -> Self {
        let group = service.into();
        Self {
            stream_prefix: "events:".to_string(),
            consumer: group.clone(),
            group,
            block: Duration::from_secs(5),
            batch_size: 16,
            max_len: Some(10_000),
        }
    }

    /// Stream key for an event type.
    pub fn stream_key(&self, event_type: &EventType) -> String {
        format!("{}{}", self.stream_prefix, event_type)
    }
}

/// Broker over Redis Streams.
pub struct RedisStreamsBroker {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    config: RedisBrokerConfig,
}

impl fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("config", &self.config)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBroker {
    /// Create a broker for `url` without connecting.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open(url: &str, config: RedisBrokerConfig) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: OnceCell::new(),
            config,
        })
    }

    /// Broker configuration.
    pub fn config(&self) -> &RedisBrokerConfig {
        &self.config
    }

    async fn connection(&self) -> Result<ConnectionManager, BrokerError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn publish(&self, event: &DomainEvent) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let key = self.config.stream_key(event.event_type());
        let body = serde_json::to_string(event)?;
        let fields = [(EVENT_FIELD, body.as_str())];

        let id: String = match self.config.max_len {
            Some(max_len) => {
                conn.xadd_maxlen(&key, StreamMaxlen::Approx(max_len), "*", &fields)
                    .await?
            }
            None => conn.xadd(&key, "*", &fields).await?,
        };

        debug!(stream = %key, entry_id = %id, event_id = %event.id(), "event appended");
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &EventType,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let key = self.config.stream_key(event_type);

        // Blocking reads get a connection of their own so they do not stall
        // publishes multiplexed on the shared one.
        let mut conn = ConnectionManager::new(self.client.clone()).await?;

        let created: RedisResult<()> = conn
            .xgroup_create_mkstream(&key, &self.config.group, "$")
            .await;
        match created {
            Ok(()) => debug!(stream = %key, group = %self.config.group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Box::new(RedisStreamConsumer {
            conn,
            key,
            config: self.config.clone(),
            buffer: VecDeque::new(),
            draining_pending: true,
        }))
    }
}

struct RedisStreamConsumer {
    conn: ConnectionManager,
    key: String,
    config: RedisBrokerConfig,
    buffer: VecDeque<StreamId>,
    draining_pending: bool,
}

impl RedisStreamConsumer {
    async fn fill(&mut self) -> Result<(), BrokerError> {
        let cursor = if self.draining_pending { "0" } else { ">" };

        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(self.config.batch_size);
        if !self.draining_pending {
            options = options.block(self.config.block.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.key], &[cursor], &options)
            .await?;

        let entries: Vec<StreamId> = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .collect();

        if self.draining_pending && entries.is_empty() {
            self.draining_pending = false;
        }

        self.buffer.extend(entries);
        Ok(())
    }

    fn decode(&self, entry: &StreamId) -> Result<DomainEvent, BrokerError> {
        let body: String = entry
            .get(EVENT_FIELD)
            .ok_or_else(|| BrokerError::Codec(format!("entry {} has no event field", entry.id)))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn ack_id(&mut self, id: &str) -> Result<(), BrokerError> {
        let _: i64 = self
            .conn
            .xack(&self.key, &self.config.group, &[id])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerConsumer for RedisStreamConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            let Some(entry) = self.buffer.pop_front() else {
                self.fill().await?;
                continue;
            };

            match self.decode(&entry) {
                Ok(event) => {
                    return Ok(Some(Delivery {
                        id: entry.id,
                        event,
                    }))
                }
                Err(error) => {
                    warn!(stream = %self.key, entry_id = %entry.id, %error, "dropping undecodable entry");
                    self.ack_id(&entry.id).await?;
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ack_id(&delivery.id).await
    }
}
