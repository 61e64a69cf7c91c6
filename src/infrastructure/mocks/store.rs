//! Counting store doubles for outage scenarios.

use crate::application::ports::CountingStore;
use crate::domain::budget::BudgetCheck;
use crate::error::StoreError;
use crate::infrastructure::memory_store::InMemoryStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Store that fails every call, or only while switched down.
#[derive(Debug)]
pub struct UnreachableStore {
    down: AtomicBool,
    calls: AtomicUsize,
    inner: InMemoryStore,
}

impl UnreachableStore {
    /// A store that is down.
    pub fn new() -> Self {
        Self {
            down: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            inner: InMemoryStore::new(),
        }
    }

    /// Bring the store up (`false`) or down (`true`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for UnreachableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CountingStore for UnreachableStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        max_points: u32,
    ) -> Result<BudgetCheck, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(self.inner.check(key, window, max_points))
    }
}

/// Store that answers only after a delay.
#[derive(Debug)]
pub struct SlowStore {
    delay: Duration,
    inner: InMemoryStore,
}

impl SlowStore {
    /// A store answering after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: InMemoryStore::new(),
        }
    }
}

#[async_trait]
impl CountingStore for SlowStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        max_points: u32,
    ) -> Result<BudgetCheck, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.inner.check(key, window, max_points))
    }
}
