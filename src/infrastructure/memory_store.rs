//! In-process counting store.
//!
//! Budgets are kept in a sharded DashMap. Check-and-decrement runs under the
//! entry lock of its key, so concurrent requests for the same client are
//! serialized while other clients proceed in parallel.
//!
//! The map is bounded. When a new client would exceed `max_entries`, expired
//! budgets are purged first; if the map is still full, the budget closest to
//! its reset among a small sample is evicted.
//!
//! This store is only shared within one process. Use `RedisStore` when
//! several instances must share budgets.

use crate::application::ports::{Clock, CountingStore};
use crate::domain::budget::{BudgetCheck, ClientBudget};
use crate::error::StoreError;
use crate::infrastructure::clock::SystemClock;
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default bound on the number of tracked budgets.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Entries inspected when choosing a budget to evict.
const EVICTION_SAMPLE: usize = 16;

/// Counting store backed by a concurrent map.
pub struct InMemoryStore {
    budgets: DashMap<String, ClientBudget, RandomState>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("budgets", &self.budgets.len())
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            budgets: DashMap::with_hasher(RandomState::new()),
            clock,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Bound the number of tracked budgets. A bound of 0 is treated as 1.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Synchronous check-and-decrement.
    pub fn check(&self, key: &str, window: Duration, max_points: u32) -> BudgetCheck {
        let now = self.clock.now();

        // No entry guard may be held while the map is scanned
        if !self.budgets.contains_key(key) && self.budgets.len() >= self.max_entries {
            self.make_room();
        }

        let mut entry = self
            .budgets
            .entry(key.to_string())
            .or_insert_with(|| ClientBudget::new(max_points, window, now));

        entry.try_consume(max_points, window, now)
    }

    /// Remaining points under `key`, if a budget exists.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        self.budgets.get(key).map(|budget| budget.remaining())
    }

    /// Drop budgets whose window has elapsed.
    ///
    /// Expired budgets are reset lazily on access anyway; purging only
    /// reclaims memory held for clients that stopped sending requests.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.budgets.len();
        self.budgets.retain(|_, budget| !budget.is_expired(now));
        before.saturating_sub(self.budgets.len())
    }

    /// Spawn a task purging expired budgets every `period`.
    ///
    /// The task stops when the returned handle is aborted or the last other
    /// reference to the store is dropped.
    pub fn spawn_purge(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    return;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = store.len(), "purged expired budgets");
                }
            }
        })
    }

    /// Largest number of budgets kept.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 && self.budgets.len() < self.max_entries {
            return;
        }

        let victim = self
            .budgets
            .iter()
            .take(EVICTION_SAMPLE)
            .min_by_key(|entry| entry.value().reset_at())
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.budgets.remove(&key);
            tracing::debug!(
                key = %key,
                max_entries = self.max_entries,
                "budget store full, evicted budget"
            );
        }
    }

    /// Get the number of budgets.
    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    /// Clear all budgets.
    pub fn clear(&self) {
        self.budgets.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CountingStore for InMemoryStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        max_points: u32,
    ) -> Result<BudgetCheck, StoreError> {
        Ok(self.check(key, window, max_points))
    }
}
