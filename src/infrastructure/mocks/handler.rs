//! Event handler double that records what it saw.

use crate::application::ports::EventHandler;
use crate::domain::event::DomainEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// How a [`RecordingHandler`] behaves on each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Succeed
    Succeed,
    /// Fail the first `n` calls, then succeed
    FailTimes(u32),
    /// Always fail
    AlwaysFail,
    /// Always panic
    Panic,
    /// Sleep before succeeding
    Sleep(Duration),
}

/// Handler that records every event it is given.
///
/// Records are shared between clones. An optional shared journal records
/// `(handler name, event id)` pairs across several handlers, which lets a
/// test check invocation order.
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    name: String,
    mode: HandlerMode,
    calls: Arc<AtomicUsize>,
    failures_left: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<DomainEvent>>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
    notify: Arc<Notify>,
}

impl RecordingHandler {
    /// A handler that always succeeds.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_mode(name, HandlerMode::Succeed)
    }

    /// A handler with the given behavior.
    pub fn with_mode(name: impl Into<String>, mode: HandlerMode) -> Self {
        let failures = match mode {
            HandlerMode::FailTimes(n) => n,
            _ => 0,
        };
        Self {
            name: name.into(),
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicU32::new(failures)),
            seen: Arc::new(Mutex::new(Vec::new())),
            journal: None,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append the handler name to `journal` on every successful call.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Number of invocations, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Events handled successfully, in order.
    pub fn seen(&self) -> Vec<DomainEvent> {
        lock(&self.seen).clone()
    }

    /// Wait until at least `count` events were handled successfully.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if lock(&self.seen).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            HandlerMode::Succeed => {}
            HandlerMode::FailTimes(_) => {
                let failing = self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                if failing.is_ok() {
                    anyhow::bail!("{} failed on purpose", self.name);
                }
            }
            HandlerMode::AlwaysFail => anyhow::bail!("{} always fails", self.name),
            HandlerMode::Panic => panic!("{} panicked on purpose", self.name),
            HandlerMode::Sleep(delay) => tokio::time::sleep(delay).await,
        }

        if let Some(journal) = &self.journal {
            lock(journal).push(self.name.clone());
        }
        lock(&self.seen).push(event.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}
