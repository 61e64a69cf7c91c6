//! Exponential backoff for broker reconnects and handler retries.

use crate::error::BuildError;
use std::time::Duration;

/// Exponential backoff schedule.
///
/// Attempt `n` (1-based) waits `initial * multiplier^(n-1)` before the next
/// attempt, capped at `max`. `max_attempts` of `None` retries forever.
///
/// # Example
/// ```
/// use admission_relay::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1))
///     .unwrap()
///     .with_max_attempts(Some(4));
///
/// assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
/// assert_eq!(backoff.delay_for(10), Duration::from_secs(1));
/// assert!(backoff.allows_attempt(4));
/// assert!(!backoff.allows_attempt(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Create a doubling schedule with no attempt limit.
    ///
    /// # Errors
    /// Returns `BuildError::InvalidBackoff` if `initial` is zero or greater
    /// than `max`.
    pub fn new(initial: Duration, max: Duration) -> Result<Self, BuildError> {
        if initial.is_zero() {
            return Err(BuildError::InvalidBackoff("initial delay must be greater than 0"));
        }
        if initial > max {
            return Err(BuildError::InvalidBackoff("initial delay exceeds max delay"));
        }
        Ok(Self {
            initial,
            max,
            multiplier: 2.0,
            max_attempts: None,
        })
    }

    /// Schedule used to (re)connect to the broker: 500ms doubling to 30s,
    /// forever.
    pub fn reconnect_default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    /// Schedule used to retry a failing handler: 3 attempts from 100ms.
    pub fn handler_default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: Some(3),
        }
    }

    /// Limit the number of attempts. `None` retries forever.
    ///
    /// `Some(0)` is treated as `Some(1)`: there is always a first attempt.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.map(|n| n.max(1));
        self
    }

    /// Set the growth factor between attempts. Values below 1.0 are clamped.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.powi(exponent);
        let delay = self.initial.as_secs_f64() * factor;

        if !delay.is_finite() || delay >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Whether attempt `attempt` (1-based) may be made.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }

    /// Attempt limit, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
