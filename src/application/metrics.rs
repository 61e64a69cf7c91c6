//! Counters for the gate and the relay.
//!
//! All metrics use relaxed atomics; handles are cheap to clone and share the
//! same counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Admission statistics.
#[derive(Debug, Clone, Default)]
pub struct GateMetrics {
    inner: Arc<GateMetricsInner>,
}

#[derive(Debug, Default)]
struct GateMetricsInner {
    admitted: AtomicU64,
    rejected: AtomicU64,
    store_failures: AtomicU64,
    failed_open: AtomicU64,
    failed_closed: AtomicU64,
}

impl GateMetrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_open(&self) {
        self.inner.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_closed(&self) {
        self.inner.failed_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests admitted, including those admitted by fail-open.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Requests rejected, including those rejected by fail-closed.
    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    /// Store calls that errored or timed out.
    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            admitted: self.admitted(),
            rejected: self.rejected(),
            store_failures: self.store_failures(),
            failed_open: self.inner.failed_open.load(Ordering::Relaxed),
            failed_closed: self.inner.failed_closed.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.admitted.store(0, Ordering::Relaxed);
        self.inner.rejected.store(0, Ordering::Relaxed);
        self.inner.store_failures.store(0, Ordering::Relaxed);
        self.inner.failed_open.store(0, Ordering::Relaxed);
        self.inner.failed_closed.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of gate metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateMetricsSnapshot {
    /// Requests admitted
    pub admitted: u64,
    /// Requests rejected
    pub rejected: u64,
    /// Store calls that failed
    pub store_failures: u64,
    /// Requests admitted because the store failed
    pub failed_open: u64,
    /// Requests rejected because the store failed
    pub failed_closed: u64,
}

impl GateMetricsSnapshot {
    /// Ratio of rejected to total requests (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been checked.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.rejected as f64 / total as f64
        }
    }

    /// Total number of admission checks.
    pub fn total(&self) -> u64 {
        self.admitted.saturating_add(self.rejected)
    }
}

/// Event relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayMetrics {
    inner: Arc<RelayMetricsInner>,
}

#[derive(Debug, Default)]
struct RelayMetricsInner {
    published: AtomicU64,
    publish_failures: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
    handler_retries: AtomicU64,
}

impl RelayMetrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.inner.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_retry(&self) {
        self.inner.handler_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            published: self.inner.published.load(Ordering::Relaxed),
            publish_failures: self.inner.publish_failures.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
            handler_retries: self.inner.handler_retries.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of relay metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayMetricsSnapshot {
    /// Events accepted by the broker
    pub published: u64,
    /// Events dropped because the broker failed
    pub publish_failures: u64,
    /// Deliveries fully dispatched to handlers
    pub delivered: u64,
    /// Handlers that gave up after their last attempt
    pub handler_failures: u64,
    /// Handler attempts repeated after a failure
    pub handler_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_metrics() {
        let metrics = GateMetrics::new();
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_rejected();
        metrics.record_store_failure();
        metrics.record_failed_open();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.failed_open, 1);
        assert_eq!(snapshot.failed_closed, 0);
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn test_rejection_rate() {
        let metrics = GateMetrics::new();
        assert_eq!(metrics.snapshot().rejection_rate(), 0.0);

        metrics.record_admitted();
        metrics.record_rejected();
        assert!((metrics.snapshot().rejection_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_rejected();
        metrics.record_rejected();
        assert!((metrics.snapshot().rejection_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = GateMetrics::new();
        let clone = metrics.clone();
        clone.record_admitted();
        assert_eq!(metrics.admitted(), 1);

        metrics.reset();
        assert_eq!(clone.snapshot().total(), 0);
    }

    #[test]
    fn test_relay_metrics() {
        let metrics = RelayMetrics::new();
        metrics.record_published();
        metrics.record_publish_failure();
        metrics.record_delivered();
        metrics.record_handler_retry();
        metrics.record_handler_retry();
        metrics.record_handler_failure();

        assert_eq!(
            metrics.snapshot(),
            RelayMetricsSnapshot {
                published: 1,
                publish_failures: 1,
                delivered: 1,
                handler_failures: 1,
                handler_retries: 2,
            }
        );
    }
}
