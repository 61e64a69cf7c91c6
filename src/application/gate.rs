//! Two-tier admission control.
//!
//! The gate answers one question per request and tier: may this client
//! proceed? Budgets live in the shared counting store; the gate only builds
//! keys, bounds the store call and decides what to do when the store fails.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::application::metrics::GateMetrics;
use crate::application::ports::{Clock, CountingStore};
use crate::domain::budget::BudgetSnapshot;
use crate::domain::key::{BudgetKey, ClientId};
use crate::domain::tier::{Tier, TierPolicies, TierPolicy};
use crate::error::{BuildError, StoreError};
use crate::infrastructure::clock::SystemClock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What the gate does when the counting store cannot answer.
///
/// Applies to every tier alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request and log a warning
    #[default]
    Open,
    /// Reject the request with [`RejectReason::StoreUnavailable`]
    Closed,
}

/// Error returned when parsing an unknown failure policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown failure policy: {0} (expected `open` or `closed`)")]
pub struct UnknownFailurePolicy(pub String);

impl FromStr for FailurePolicy {
    type Err = UnknownFailurePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(UnknownFailurePolicy(other.to_string())),
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The client has no points left in the current window
    BudgetExhausted(BudgetSnapshot),
    /// The store failed and the gate fails closed
    StoreUnavailable,
}

/// A rejected admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("admission rejected for {client_id} on {tier} tier")]
pub struct Rejection {
    /// Tier that rejected the request
    pub tier: Tier,
    /// Client that was rejected
    pub client_id: ClientId,
    /// Why
    pub reason: RejectReason,
}

impl Rejection {
    /// How long the client should wait before retrying, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.reason {
            RejectReason::BudgetExhausted(budget) => Some(budget.reset_after),
            RejectReason::StoreUnavailable => None,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    ///
    /// `budget` is `None` when the store could not be consulted and the gate
    /// failed open.
    Allowed {
        /// Budget after this request
        budget: Option<BudgetSnapshot>,
    },
    /// The request must be refused
    Rejected(Rejection),
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// Convert into a `Result`, for use with `?`.
    pub fn into_result(self) -> Result<Option<BudgetSnapshot>, Rejection> {
        match self {
            Admission::Allowed { budget } => Ok(budget),
            Admission::Rejected(rejection) => Err(rejection),
        }
    }
}

/// Per-client, per-tier admission filter.
///
/// Cheap to clone; clones share the store, circuit breaker and metrics.
///
/// # Example
/// ```
/// use admission_relay::{ClientId, InMemoryStore, RateLimiterGate, Tier, TierPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let gate = RateLimiterGate::builder(Arc::new(InMemoryStore::new()))
///     .with_policy(Tier::Sensitive, TierPolicy::new(2, Duration::from_secs(60)).unwrap())
///     .build()
///     .unwrap();
///
/// let client = ClientId::new("203.0.113.9");
/// assert!(gate.admit(&client, Tier::Sensitive).await.is_allowed());
/// assert!(gate.admit(&client, Tier::Sensitive).await.is_allowed());
/// assert!(!gate.admit(&client, Tier::Sensitive).await.is_allowed());
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiterGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    store: Arc<dyn CountingStore>,
    policies: TierPolicies,
    key_prefix: String,
    store_timeout: Duration,
    failure_policy: FailurePolicy,
    circuit_breaker: CircuitBreaker,
    metrics: GateMetrics,
}

impl fmt::Debug for RateLimiterGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterGate")
            .field("store", &self.inner.store)
            .field("policies", &self.inner.policies)
            .field("key_prefix", &self.inner.key_prefix)
            .field("store_timeout", &self.inner.store_timeout)
            .field("failure_policy", &self.inner.failure_policy)
            .finish()
    }
}

impl RateLimiterGate {
    /// Create a builder around a counting store.
    ///
    /// Defaults:
    /// - Policies: global 10 per second, sensitive 50 per 15 minutes
    /// - Key prefix: `rate:`
    /// - Store timeout: 250ms
    /// - Failure policy: open
    /// - Circuit breaker: opens after 5 failures, probes after 30 seconds
    pub fn builder(store: Arc<dyn CountingStore>) -> RateLimiterGateBuilder {
        RateLimiterGateBuilder {
            store,
            policies: TierPolicies::default(),
            key_prefix: "rate:".to_string(),
            store_timeout: Duration::from_millis(250),
            failure_policy: FailurePolicy::Open,
            circuit_breaker: CircuitBreakerConfig::default(),
            clock: None,
        }
    }

    /// Check and consume one point of `client`'s budget for `tier`.
    ///
    /// Never retries and never returns an error: store failures are
    /// resolved by the failure policy.
    pub async fn admit(&self, client: &ClientId, tier: Tier) -> Admission {
        let inner = &self.inner;

        if !inner.circuit_breaker.allow_request() {
            tracing::debug!(client_id = %client, %tier, "store circuit open, skipping check");
            return self.on_store_failure(client, tier);
        }

        let policy = inner.policies.for_tier(tier);
        let key = BudgetKey::new(tier, client.clone()).storage_key(&inner.key_prefix);

        let result = match tokio::time::timeout(
            inner.store_timeout,
            inner
                .store
                .check_and_decrement(&key, policy.window(), policy.max_points()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(inner.store_timeout)),
        };

        match result {
            Ok(check) => {
                inner.circuit_breaker.record_success();

                if check.allowed {
                    inner.metrics.record_admitted();
                    return Admission::Allowed {
                        budget: Some(check.budget),
                    };
                }

                inner.metrics.record_rejected();
                tracing::warn!(
                    client_id = %client,
                    %tier,
                    limit = check.budget.limit,
                    reset_after_ms = check.budget.reset_after.as_millis() as u64,
                    "Rate limit exceeded for IP"
                );

                Admission::Rejected(Rejection {
                    tier,
                    client_id: client.clone(),
                    reason: RejectReason::BudgetExhausted(check.budget),
                })
            }
            Err(error) => {
                inner.circuit_breaker.record_failure();
                inner.metrics.record_store_failure();
                tracing::warn!(
                    client_id = %client,
                    %tier,
                    %error,
                    failure_policy = ?inner.failure_policy,
                    "counting store check failed"
                );
                self.on_store_failure(client, tier)
            }
        }
    }

    fn on_store_failure(&self, client: &ClientId, tier: Tier) -> Admission {
        let inner = &self.inner;

        match inner.failure_policy {
            FailurePolicy::Open => {
                inner.metrics.record_failed_open();
                inner.metrics.record_admitted();
                Admission::Allowed { budget: None }
            }
            FailurePolicy::Closed => {
                inner.metrics.record_failed_closed();
                inner.metrics.record_rejected();
                Admission::Rejected(Rejection {
                    tier,
                    client_id: client.clone(),
                    reason: RejectReason::StoreUnavailable,
                })
            }
        }
    }

    /// Policy applied to a tier.
    pub fn policy(&self, tier: Tier) -> TierPolicy {
        self.inner.policies.for_tier(tier)
    }

    /// Configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy
    }

    /// Admission counters.
    pub fn metrics(&self) -> &GateMetrics {
        &self.inner.metrics
    }

    /// State of the store circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.circuit_breaker.state()
    }
}

/// Builder for [`RateLimiterGate`].
pub struct RateLimiterGateBuilder {
    store: Arc<dyn CountingStore>,
    policies: TierPolicies,
    key_prefix: String,
    store_timeout: Duration,
    failure_policy: FailurePolicy,
    circuit_breaker: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl RateLimiterGateBuilder {
    /// Set the policy of one tier.
    pub fn with_policy(mut self, tier: Tier, policy: TierPolicy) -> Self {
        self.policies.set(tier, policy);
        self
    }

    /// Replace all tier policies.
    pub fn with_policies(mut self, policies: TierPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Set the store key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound every store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Choose what happens when the store fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Configure the store circuit breaker.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the gate.
    ///
    /// # Errors
    /// Returns `BuildError` if the store timeout is zero or the key prefix
    /// is empty.
    pub fn build(self) -> Result<RateLimiterGate, BuildError> {
        if self.store_timeout.is_zero() {
            return Err(BuildError::ZeroTimeout("store_timeout"));
        }
        if self.key_prefix.is_empty() {
            return Err(BuildError::EmptyKeyPrefix);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let circuit_breaker = CircuitBreaker::with_clock(self.circuit_breaker, clock);

        Ok(RateLimiterGate {
            inner: Arc::new(GateInner {
                store: self.store,
                policies: self.policies,
                key_prefix: self.key_prefix,
                store_timeout: self.store_timeout,
                failure_policy: self.failure_policy,
                circuit_breaker,
                metrics: GateMetrics::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::InMemoryStore;
    use crate::infrastructure::mocks::{MockClock, SlowStore, UnreachableStore};
    use std::time::Instant;

    fn client() -> ClientId {
        ClientId::new("198.51.100.4")
    }

    #[tokio::test]
    async fn test_global_tier_limits_per_window() {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
        let gate = RateLimiterGate::builder(store).build().unwrap();

        for _ in 0..10 {
            assert!(gate.admit(&client(), Tier::Global).await.is_allowed());
        }
        assert!(!gate.admit(&client(), Tier::Global).await.is_allowed());

        clock.advance(Duration::from_secs(1));
        assert!(gate.admit(&client(), Tier::Global).await.is_allowed());
    }

    #[tokio::test]
    async fn test_rejection_carries_budget() {
        let store = Arc::new(InMemoryStore::new());
        let gate = RateLimiterGate::builder(store)
            .with_policy(
                Tier::Sensitive,
                TierPolicy::new(1, Duration::from_secs(60)).unwrap(),
            )
            .build()
            .unwrap();

        gate.admit(&client(), Tier::Sensitive).await;
        let rejection = gate
            .admit(&client(), Tier::Sensitive)
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(rejection.tier, Tier::Sensitive);
        assert_eq!(rejection.client_id, client());
        match rejection.reason {
            RejectReason::BudgetExhausted(budget) => {
                assert_eq!(budget.limit, 1);
                assert_eq!(budget.remaining, 0);
            }
            other => panic!("unexpected reason {:?}", other),
        }
        assert!(rejection.retry_after().unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_tiers_and_clients_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        let gate = RateLimiterGate::builder(store)
            .with_policy(Tier::Global, TierPolicy::new(1, Duration::from_secs(60)).unwrap())
            .build()
            .unwrap();

        assert!(gate.admit(&client(), Tier::Global).await.is_allowed());
        assert!(!gate.admit(&client(), Tier::Global).await.is_allowed());

        // Same client, other tier
        assert!(gate.admit(&client(), Tier::Sensitive).await.is_allowed());
        // Other client, same tier
        let other = ClientId::new("198.51.100.5");
        assert!(gate.admit(&other, Tier::Global).await.is_allowed());
    }

    #[tokio::test]
    async fn test_fail_open_admits() {
        let store = Arc::new(UnreachableStore::new());
        let gate = RateLimiterGate::builder(store.clone()).build().unwrap();

        let admission = gate.admit(&client(), Tier::Sensitive).await;
        assert_eq!(admission, Admission::Allowed { budget: None });

        let snapshot = gate.metrics().snapshot();
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.failed_open, 1);
        assert_eq!(snapshot.admitted, 1);
    }

    #[tokio::test]
    async fn test_fail_closed_rejects() {
        let store = Arc::new(UnreachableStore::new());
        let gate = RateLimiterGate::builder(store)
            .with_failure_policy(FailurePolicy::Closed)
            .build()
            .unwrap();

        let rejection = gate
            .admit(&client(), Tier::Global)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::StoreUnavailable);
        assert_eq!(rejection.retry_after(), None);
        assert_eq!(gate.metrics().snapshot().failed_closed, 1);
    }

    #[tokio::test]
    async fn test_store_timeout_applies_failure_policy() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(200)));
        let gate = RateLimiterGate::builder(store)
            .with_store_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        assert_eq!(
            gate.admit(&client(), Tier::Global).await,
            Admission::Allowed { budget: None }
        );
        assert_eq!(gate.metrics().store_failures(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_skips_store() {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(UnreachableStore::new());
        let gate = RateLimiterGate::builder(store.clone())
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(10),
            })
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        for _ in 0..3 {
            gate.admit(&client(), Tier::Global).await;
        }
        assert_eq!(gate.circuit_state(), CircuitState::Open);
        assert_eq!(store.calls(), 3);

        // Open circuit: store is not called, request still admitted
        assert!(gate.admit(&client(), Tier::Global).await.is_allowed());
        assert_eq!(store.calls(), 3);

        // After recovery timeout a probe reaches the store
        clock.advance(Duration::from_secs(10));
        gate.admit(&client(), Tier::Global).await;
        assert_eq!(store.calls(), 4);
        assert_eq!(gate.circuit_state(), CircuitState::Open);
    }

    #[test]
    fn test_builder_validation() {
        let store = Arc::new(InMemoryStore::new());
        assert_eq!(
            RateLimiterGate::builder(store.clone())
                .with_store_timeout(Duration::ZERO)
                .build()
                .unwrap_err(),
            BuildError::ZeroTimeout("store_timeout")
        );
        assert_eq!(
            RateLimiterGate::builder(store)
                .with_key_prefix("")
                .build()
                .unwrap_err(),
            BuildError::EmptyKeyPrefix
        );
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("open".parse::<FailurePolicy>(), Ok(FailurePolicy::Open));
        assert_eq!("CLOSED".parse::<FailurePolicy>(), Ok(FailurePolicy::Closed));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default(), FailurePolicy::Open);
    }
}
