//! Per-client fixed-window budgets.
//!
//! A budget starts with the tier's maximum points and loses one point per
//! admitted request. Once the reset deadline passes, the next access starts a
//! fresh window at full budget. A request that finds no points left is
//! rejected and leaves the budget untouched, so `remaining` never underflows.

use crate::domain::tier::TierPolicy;
use std::time::{Duration, Instant};

/// Budget state reported after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    /// Points per window for the tier
    pub limit: u32,
    /// Points left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Result of an atomic check-and-decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCheck {
    /// Whether a point was consumed
    pub allowed: bool,
    /// Budget after the check
    pub budget: BudgetSnapshot,
}

impl BudgetCheck {
    /// An admitted check.
    pub fn allowed(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            budget: BudgetSnapshot {
                limit,
                remaining,
                reset_after,
            },
        }
    }

    /// A rejected check. Nothing is left in the window.
    pub fn rejected(limit: u32, reset_after: Duration) -> Self {
        Self {
            allowed: false,
            budget: BudgetSnapshot {
                limit,
                remaining: 0,
                reset_after,
            },
        }
    }
}

/// Remaining points and reset deadline for one `(tier, client)` pair.
///
/// # Example
/// ```
/// use admission_relay::ClientBudget;
/// use std::time::{Duration, Instant};
///
/// let now = Instant::now();
/// let window = Duration::from_secs(1);
/// let mut budget = ClientBudget::new(2, window, now);
///
/// assert!(budget.try_consume(2, window, now).allowed);
/// assert!(budget.try_consume(2, window, now).allowed);
/// assert!(!budget.try_consume(2, window, now).allowed);
///
/// // Next window starts at full budget
/// let later = now + Duration::from_secs(1);
/// assert!(budget.try_consume(2, window, later).allowed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBudget {
    remaining: u32,
    reset_at: Instant,
}

impl ClientBudget {
    /// Start a fresh window at `now`.
    ///
    /// Windows longer than [`TierPolicy::MAX_WINDOW`] are clamped to it.
    pub fn new(max_points: u32, window: Duration, now: Instant) -> Self {
        let window = window.min(TierPolicy::MAX_WINDOW);
        Self {
            remaining: max_points,
            reset_at: now.checked_add(window).unwrap_or(now),
        }
    }

    /// Consume one point if available.
    ///
    /// # Arguments
    /// * `max_points` - Budget of a fresh window
    /// * `window` - Window length
    /// * `now` - Current time
    pub fn try_consume(&mut self, max_points: u32, window: Duration, now: Instant) -> BudgetCheck {
        if self.is_expired(now) {
            *self = Self::new(max_points, window, now);
        }

        let reset_after = self.reset_at.saturating_duration_since(now);

        if self.remaining == 0 {
            return BudgetCheck::rejected(max_points, reset_after);
        }

        self.remaining -= 1;
        BudgetCheck::allowed(max_points, self.remaining, reset_after)
    }

    /// Points left in the current window.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// When the current window ends.
    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    /// Whether the window has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaust_then_reject() {
        let now = Instant::now();
        let window = Duration::from_secs(900);
        let mut budget = ClientBudget::new(50, window, now);

        for i in 0..50 {
            let check = budget.try_consume(50, window, now);
            assert!(check.allowed, "request {} should be allowed", i + 1);
            assert_eq!(check.budget.remaining, 49 - i);
        }

        let check = budget.try_consume(50, window, now);
        assert!(!check.allowed);
        assert_eq!(check.budget.remaining, 0);
        assert_eq!(check.budget.limit, 50);
    }

    #[test]
    fn test_rejection_does_not_underflow() {
        let now = Instant::now();
        let window = Duration::from_secs(1);
        let mut budget = ClientBudget::new(1, window, now);

        assert!(budget.try_consume(1, window, now).allowed);
        for _ in 0..10 {
            assert!(!budget.try_consume(1, window, now).allowed);
            assert_eq!(budget.remaining(), 0);
        }
    }

    #[test]
    fn test_window_reset() {
        let now = Instant::now();
        let window = Duration::from_secs(1);
        let mut budget = ClientBudget::new(3, window, now);

        for _ in 0..3 {
            budget.try_consume(3, window, now);
        }
        assert!(!budget.try_consume(3, window, now).allowed);

        // Still inside the window
        let almost = now + Duration::from_millis(999);
        assert!(!budget.try_consume(3, window, almost).allowed);

        let after = now + window;
        let check = budget.try_consume(3, window, after);
        assert!(check.allowed);
        assert_eq!(check.budget.remaining, 2);
        assert_eq!(budget.reset_at(), after + window);
    }

    #[test]
    fn test_reset_after_counts_down() {
        let now = Instant::now();
        let window = Duration::from_secs(10);
        let mut budget = ClientBudget::new(5, window, now);

        let check = budget.try_consume(5, window, now + Duration::from_secs(4));
        assert_eq!(check.budget.reset_after, Duration::from_secs(6));
    }

    #[test]
    fn test_huge_window_is_clamped() {
        let now = Instant::now();
        let window = Duration::from_secs(u64::MAX);
        let mut budget = ClientBudget::new(1, window, now);

        assert_eq!(budget.reset_at(), now + TierPolicy::MAX_WINDOW);
        assert!(budget.try_consume(1, window, now).allowed);
        assert!(!budget.try_consume(1, window, now).allowed);
    }
}
