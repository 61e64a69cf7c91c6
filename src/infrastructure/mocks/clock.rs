//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Clock whose time only moves when a test moves it.
///
/// Clones share the same time, so a clone handed to a store or gate can be
/// advanced from the test body.
///
/// # Examples
///
/// ```
/// use admission_relay::application::ports::Clock;
/// use admission_relay::infrastructure::mocks::MockClock;
/// use std::time::{Duration, Instant};
///
/// let clock = MockClock::new(Instant::now());
/// let shared = clock.clone();
///
/// shared.advance(Duration::from_secs(900));
/// assert_eq!(clock.elapsed(), Duration::from_secs(900));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.lock() = instant;
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        self.lock().saturating_duration_since(self.start)
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.current_time.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.lock()
    }
}
