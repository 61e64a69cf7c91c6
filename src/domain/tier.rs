//! Admission tiers and their budgets.
//!
//! A tier is a named rate limiting policy. Requests are checked against the
//! `global` tier first and, for sensitive routes, against the `sensitive`
//! tier as well. Each tier keeps its own budget per client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Named admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Coarse, high-frequency protection applied to every request
    Global,
    /// Strict, low-frequency protection for sensitive endpoints
    Sensitive,
}

impl Tier {
    /// Every tier, in check order.
    pub const ALL: [Tier; 2] = [Tier::Global, Tier::Sensitive];

    /// Stable lowercase name, used in store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Sensitive => "sensitive",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Tier::Global),
            "sensitive" => Ok(Tier::Sensitive),
            other => Err(PolicyError::UnknownTier(other.to_string())),
        }
    }
}

/// Error returned when a tier policy is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A budget of zero points would reject every request
    #[error("max_points must be greater than 0")]
    ZeroPoints,
    /// A zero-length window never resets
    #[error("window must be greater than 0")]
    ZeroWindow,
    /// Window longer than `TierPolicy::MAX_WINDOW`
    #[error("window must not exceed {max:?}, got {window:?}")]
    WindowTooLarge {
        /// Requested window
        window: Duration,
        /// Largest accepted window
        max: Duration,
    },
    /// Tier name not recognized
    #[error("unknown tier: {0}")]
    UnknownTier(String),
}

/// Budget for a single tier: `max_points` requests per fixed `window`.
///
/// # Example
/// ```
/// use admission_relay::TierPolicy;
/// use std::time::Duration;
///
/// let policy = TierPolicy::new(50, Duration::from_secs(15 * 60)).unwrap();
/// assert_eq!(policy.max_points(), 50);
///
/// assert!(TierPolicy::new(0, Duration::from_secs(1)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    max_points: u32,
    window: Duration,
}

impl TierPolicy {
    /// Longest accepted window: 365 days.
    pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    /// Create a policy.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroPoints` or `PolicyError::ZeroWindow` if
    /// either bound is zero, and `PolicyError::WindowTooLarge` if `window`
    /// exceeds [`TierPolicy::MAX_WINDOW`].
    pub fn new(max_points: u32, window: Duration) -> Result<Self, PolicyError> {
        if max_points == 0 {
            return Err(PolicyError::ZeroPoints);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        if window > Self::MAX_WINDOW {
            return Err(PolicyError::WindowTooLarge {
                window,
                max: Self::MAX_WINDOW,
            });
        }
        Ok(Self { max_points, window })
    }

    /// Default global policy: 10 points per second.
    pub fn global_default() -> Self {
        Self {
            max_points: 10,
            window: Duration::from_secs(1),
        }
    }

    /// Default sensitive policy: 50 requests per 15 minutes.
    pub fn sensitive_default() -> Self {
        Self {
            max_points: 50,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// Points available per window.
    pub fn max_points(&self) -> u32 {
        self.max_points
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Policies for every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicies {
    global: TierPolicy,
    sensitive: TierPolicy,
}

impl TierPolicies {
    /// Create a policy set.
    pub fn new(global: TierPolicy, sensitive: TierPolicy) -> Self {
        Self { global, sensitive }
    }

    /// Policy applied to a tier.
    pub fn for_tier(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::Global => self.global,
            Tier::Sensitive => self.sensitive,
        }
    }

    /// Replace the policy of one tier.
    pub fn set(&mut self, tier: Tier, policy: TierPolicy) {
        match tier {
            Tier::Global => self.global = policy,
            Tier::Sensitive => self.sensitive = policy,
        }
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            global: TierPolicy::global_default(),
            sensitive: TierPolicy::sensitive_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_validation() {
        assert_eq!(
            TierPolicy::new(0, Duration::from_secs(1)),
            Err(PolicyError::ZeroPoints)
        );
        assert_eq!(
            TierPolicy::new(5, Duration::ZERO),
            Err(PolicyError::ZeroWindow)
        );

        let policy = TierPolicy::new(5, Duration::from_millis(500)).unwrap();
        assert_eq!(policy.max_points(), 5);
        assert_eq!(policy.window(), Duration::from_millis(500));
    }

    #[test]
    fn test_oversized_window_rejected() {
        assert_eq!(
            TierPolicy::new(5, Duration::from_secs(u64::MAX)),
            Err(PolicyError::WindowTooLarge {
                window: Duration::from_secs(u64::MAX),
                max: TierPolicy::MAX_WINDOW,
            })
        );

        let longest = TierPolicy::new(5, TierPolicy::MAX_WINDOW).unwrap();
        assert_eq!(longest.window(), TierPolicy::MAX_WINDOW);
    }

    #[test]
    fn test_defaults() {
        let policies = TierPolicies::default();

        let global = policies.for_tier(Tier::Global);
        assert_eq!(global.max_points(), 10);
        assert_eq!(global.window(), Duration::from_secs(1));

        let sensitive = policies.for_tier(Tier::Sensitive);
        assert_eq!(sensitive.max_points(), 50);
        assert_eq!(sensitive.window(), Duration::from_secs(900));
    }

    #[test]
    fn test_set_policy() {
        let mut policies = TierPolicies::default();
        let strict = TierPolicy::new(1, Duration::from_secs(60)).unwrap();
        policies.set(Tier::Sensitive, strict);

        assert_eq!(policies.for_tier(Tier::Sensitive), strict);
        assert_eq!(policies.for_tier(Tier::Global), TierPolicy::global_default());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("global".parse::<Tier>(), Ok(Tier::Global));
        assert_eq!(" Sensitive ".parse::<Tier>(), Ok(Tier::Sensitive));
        assert_eq!(
            "burst".parse::<Tier>(),
            Err(PolicyError::UnknownTier("burst".to_string()))
        );
        assert_eq!(Tier::Sensitive.to_string(), "sensitive");
    }
}
