//! Admission control with the in-memory store.
//!
//! Shows per-client budgets on both tiers, the window reset, and what the
//! gate does when its counting store is down under each failure policy.

use admission_relay::{
    Admission, BudgetCheck, ClientId, CountingStore, FailurePolicy, InMemoryStore,
    RateLimiterGate, RejectReason, StoreError, Tier, TierPolicy,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A store that is always down.
#[derive(Debug)]
struct OfflineStore;

#[async_trait]
impl CountingStore for OfflineStore {
    async fn check_and_decrement(
        &self,
        _key: &str,
        _window: Duration,
        _max_points: u32,
    ) -> Result<BudgetCheck, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn describe(admission: &Admission) -> String {
    match admission {
        Admission::Allowed { budget: Some(budget) } => {
            format!("allowed ({} of {} left)", budget.remaining, budget.limit)
        }
        Admission::Allowed { budget: None } => "allowed (store bypassed)".to_string(),
        Admission::Rejected(rejection) => match &rejection.reason {
            RejectReason::BudgetExhausted(budget) => format!(
                "rejected, retry in {}ms",
                budget.reset_after.as_millis()
            ),
            RejectReason::StoreUnavailable => "rejected, store unavailable".to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("admission_relay=info")
        .init();

    println!("=== Admission Gate Example ===\n");

    let store = Arc::new(InMemoryStore::new().with_max_entries(10_000));
    let purge = store.spawn_purge(Duration::from_secs(30));

    let gate = RateLimiterGate::builder(store)
        .with_policy(Tier::Global, TierPolicy::new(5, Duration::from_millis(500))?)
        .with_policy(Tier::Sensitive, TierPolicy::new(2, Duration::from_secs(60))?)
        .build()?;

    let alice = ClientId::new("203.0.113.9");
    let bob = ClientId::new("198.51.100.4");

    println!("Global tier, 5 per 500ms, 7 requests from one client:");
    for n in 1..=7 {
        let admission = gate.admit(&alice, Tier::Global).await;
        println!("  request {}: {}", n, describe(&admission));
    }

    println!("\nAnother client has its own budget:");
    let admission = gate.admit(&bob, Tier::Global).await;
    println!("  {}: {}", bob, describe(&admission));

    println!("\nAfter the window elapses the budget is full again:");
    tokio::time::sleep(Duration::from_millis(550)).await;
    let admission = gate.admit(&alice, Tier::Global).await;
    println!("  {}: {}", alice, describe(&admission));

    println!("\nSensitive tier, 2 per minute, counted apart from the global tier:");
    for n in 1..=3 {
        let admission = gate.admit(&alice, Tier::Sensitive).await;
        println!("  request {}: {}", n, describe(&admission));
    }

    let snapshot = gate.metrics().snapshot();
    println!(
        "\nMetrics: {} admitted, {} rejected",
        snapshot.admitted, snapshot.rejected
    );

    println!("\n=== Store Outage ===\n");
    for policy in [FailurePolicy::Open, FailurePolicy::Closed] {
        let gate = RateLimiterGate::builder(Arc::new(OfflineStore))
            .with_failure_policy(policy)
            .build()?;
        let admission = gate.admit(&alice, Tier::Sensitive).await;
        println!("  {:?}: {}", policy, describe(&admission));
    }

    purge.abort();
    println!("\n=== Example Complete ===");
    Ok(())
}
