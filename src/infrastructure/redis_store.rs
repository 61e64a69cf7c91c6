//! Redis-backed counting store.
//!
//! Budgets shared by every instance of a service live in Redis, one key per
//! `(tier, client)` pair. Each check runs a single Lua script, which makes
//! check-and-decrement atomic without any lock in the application:
//!
//! - missing key: create it at `max_points - 1` with the window as TTL
//! - key at zero: reject, leave it untouched
//! - otherwise: `DECR`
//!
//! The key's TTL is the window reset deadline, so an elapsed window simply
//! disappears and the next request starts a fresh one.
//!
//! The connection is established lazily on first use and kept in a
//! `ConnectionManager`, which reconnects by itself after failures. A service
//! can therefore start while Redis is down; checks fail (and the gate's
//! failure policy applies) until Redis comes back.
//!
//! ## Example
//!
//! ```rust,no_run
//! use admission_relay::{RateLimiterGate, RedisStore};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::open("redis://127.0.0.1:6379/")?;
//! let gate = RateLimiterGate::builder(Arc::new(store)).build()?;
//! # Ok(())
//! # }
//! ```

use crate::application::ports::CountingStore;
use crate::domain::budget::BudgetCheck;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;

const CHECK_AND_DECREMENT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    local remaining = tonumber(ARGV[2]) - 1
    redis.call('SET', KEYS[1], remaining, 'PX', ARGV[1])
    return {1, remaining, tonumber(ARGV[1])}
end

local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end

if tonumber(current) <= 0 then
    return {0, 0, ttl}
end

local remaining = redis.call('DECR', KEYS[1])
return {1, remaining, ttl}
";

/// Counting store shared across instances through Redis.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Create a store for `url` without connecting.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, RedisError> {
        Ok(Self::from_client(Client::open(url)?))
    }

    /// Create a store from an existing client without connecting.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(CHECK_AND_DECREMENT),
        }
    }

    /// Create a store and connect right away.
    ///
    /// # Errors
    /// Returns error if Redis cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let store = Self::open(url)?;
        store.connection().await?;
        Ok(store)
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }

    /// Whether a connection has been established at least once.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        max_points: u32,
    ) -> Result<BudgetCheck, StoreError> {
        let window_ms = window_millis(window)?;
        let mut conn = self.connection().await?;

        let (allowed, remaining, ttl_ms): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .arg(max_points)
            .invoke_async(&mut conn)
            .await?;

        let reset_after = Duration::from_millis(ttl_ms.max(0) as u64);

        if allowed == 1 {
            let remaining = u32::try_from(remaining.max(0))
                .map_err(|_| StoreError::Backend(format!("remaining out of range: {}", remaining)))?;
            Ok(BudgetCheck::allowed(max_points, remaining, reset_after))
        } else {
            Ok(BudgetCheck::rejected(max_points, reset_after))
        }
    }
}

/// Window as a `PX` argument, at least 1ms.
fn window_millis(window: Duration) -> Result<u64, StoreError> {
    u64::try_from(window.as_millis().max(1))
        .map_err(|_| StoreError::Backend(format!("window {:?} does not fit in milliseconds", window)))
}
