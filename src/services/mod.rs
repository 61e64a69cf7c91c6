//! Post, media and search services.
//!
//! Each service is an axum router guarded by the global admission tier, with
//! sensitive routes guarded by the sensitive tier as well. Mutations publish
//! domain events through the relay; media and search subscribe to them.
//!
//! Persistence is out of scope: every service keeps its records in an
//! in-memory store shared between clones.

pub mod media;
pub mod payloads;
pub mod posts;
pub mod search;

use crate::application::circuit_breaker::CircuitState;
use crate::application::gate::RateLimiterGate;
use crate::application::relay::EventRelay;
use crate::domain::tier::Tier;
use crate::http::{enforce_admission, log_requests, AdmissionState, ApiError, ClientIpSource};
use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Header carrying the caller's user id, set by the API gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// What every service needs: its name, the gate and the relay.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    name: Arc<str>,
    port: u16,
    gate: RateLimiterGate,
    relay: EventRelay,
    client_ip: ClientIpSource,
}

impl ServiceContext {
    /// Bundle a service's collaborators.
    pub fn new(name: impl Into<Arc<str>>, port: u16, gate: RateLimiterGate, relay: EventRelay) -> Self {
        Self {
            name: name.into(),
            port,
            gate,
            relay,
            client_ip: ClientIpSource::default(),
        }
    }

    /// Choose where client addresses come from.
    pub fn with_client_ip(mut self, source: ClientIpSource) -> Self {
        self.client_ip = source;
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admission gate.
    pub fn gate(&self) -> &RateLimiterGate {
        &self.gate
    }

    /// Event relay.
    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    /// Middleware state enforcing `tier`.
    ///
    /// Sensitive routes also report their budget in `RateLimit-*` headers.
    pub fn admission(&self, tier: Tier) -> AdmissionState {
        AdmissionState::new(self.gate.clone(), tier)
            .with_client_ip(self.client_ip)
            .with_rate_limit_headers(tier == Tier::Sensitive)
    }

    /// Health report: the service is up; the store and broker may not be.
    pub fn health(&self) -> Value {
        let store = match self.gate.circuit_state() {
            CircuitState::Closed => "connected",
            CircuitState::HalfOpen => "recovering",
            CircuitState::Open => "unavailable",
        };

        json!({
            "status": "ok",
            "service": self.name(),
            "timestamp": Utc::now().to_rfc3339(),
            "port": self.port,
            "environment": {
                "redis": store,
                "broker": self.relay.state().as_str(),
            },
        })
    }

    /// Wrap a service router with the fallback and the shared layers.
    ///
    /// Outermost first: tracing, request logging, CORS, global admission.
    /// Unknown routes pass the global tier too.
    pub fn finish<S>(&self, router: Router<S>, state: S) -> Router
    where
        S: Clone + Send + Sync + 'static,
    {
        let ctx = self.clone();
        router
            .fallback(move |uri: Uri| not_found(ctx.clone(), uri))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn(log_requests))
                    .layer(CorsLayer::permissive())
                    .layer(middleware::from_fn_with_state(
                        self.admission(Tier::Global),
                        enforce_admission,
                    )),
            )
    }
}

/// `GET /api/<service>/health`
pub async fn health<S>(State(state): State<S>) -> Json<Value>
where
    S: AsRef<ServiceContext>,
{
    Json(state.as_ref().health())
}

async fn not_found(ctx: ServiceContext, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "message": "Route not found",
            "service": ctx.name(),
            "path": uri.path(),
        })),
    )
}

/// Caller identity forwarded by the gateway in `x-user-id`.
///
/// Rejects with `401` when the header is missing or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for GatewayUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| GatewayUser(user.to_string()))
            .ok_or_else(|| {
                tracing::warn!("Access attempted without user ID");
                ApiError::Unauthorized
            })
    }
}
