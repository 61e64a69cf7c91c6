//! Admission middleware.
//!
//! Wraps a router (or a single route) with one tier of the gate:
//!
//! ```no_run
//! use admission_relay::http::{enforce_admission, AdmissionState};
//! use admission_relay::{InMemoryStore, RateLimiterGate, Tier};
//! use axum::{middleware, routing::post, Router};
//! use std::sync::Arc;
//!
//! let gate = RateLimiterGate::builder(Arc::new(InMemoryStore::new())).build().unwrap();
//! let sensitive = AdmissionState::new(gate.clone(), Tier::Sensitive).with_rate_limit_headers(true);
//!
//! let app: Router = Router::new()
//!     .route(
//!         "/api/posts",
//!         post(|| async { "created" })
//!             .route_layer(middleware::from_fn_with_state(sensitive, enforce_admission)),
//!     )
//!     .layer(middleware::from_fn_with_state(
//!         AdmissionState::new(gate, Tier::Global),
//!         enforce_admission,
//!     ));
//! ```

use crate::application::gate::{Admission, RateLimiterGate};
use crate::domain::budget::BudgetSnapshot;
use crate::domain::tier::Tier;
use crate::http::client_ip::ClientIpSource;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

/// `RateLimit-Limit`
pub static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
/// `RateLimit-Remaining`
pub static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
/// `RateLimit-Reset`
pub static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// State for [`enforce_admission`]: which gate, which tier, and how to
/// identify the client.
#[derive(Debug, Clone)]
pub struct AdmissionState {
    gate: RateLimiterGate,
    tier: Tier,
    client_ip: ClientIpSource,
    rate_limit_headers: bool,
}

impl AdmissionState {
    /// Enforce `tier` of `gate`, identifying clients by peer address.
    pub fn new(gate: RateLimiterGate, tier: Tier) -> Self {
        Self {
            gate,
            tier,
            client_ip: ClientIpSource::default(),
            rate_limit_headers: false,
        }
    }

    /// Choose where the client address comes from.
    pub fn with_client_ip(mut self, source: ClientIpSource) -> Self {
        self.client_ip = source;
        self
    }

    /// Add `RateLimit-*` headers to admitted responses.
    pub fn with_rate_limit_headers(mut self, enabled: bool) -> Self {
        self.rate_limit_headers = enabled;
        self
    }

    /// The tier this state enforces.
    pub fn tier(&self) -> Tier {
        self.tier
    }
}

/// Admit the request through one tier, or answer for the handler.
///
/// Rejections become `429 Too Many Requests` (budget exhausted) or
/// `503 Service Unavailable` (store down under a closed failure policy).
pub async fn enforce_admission(
    State(state): State<AdmissionState>,
    req: Request,
    next: Next,
) -> Response {
    let client = state.client_ip.client_id(&req);

    match state.gate.admit(&client, state.tier).await {
        Admission::Allowed { budget } => {
            let mut response = next.run(req).await;
            if state.rate_limit_headers {
                if let Some(budget) = budget {
                    insert_rate_limit_headers(response.headers_mut(), &budget);
                }
            }
            response
        }
        Admission::Rejected(rejection) => rejection.into_response(),
    }
}

/// Write the `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset`
/// headers for `budget`.
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, budget: &BudgetSnapshot) {
    headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(budget.limit));
    headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(budget.remaining));
    headers.insert(
        RATELIMIT_RESET.clone(),
        HeaderValue::from(whole_seconds(budget.reset_after)),
    );
}

/// Seconds until `after`, rounded up.
pub(crate) fn whole_seconds(after: Duration) -> u64 {
    let secs = after.as_secs();
    if after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
