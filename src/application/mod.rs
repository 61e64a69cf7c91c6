//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Rate limiter gate (admission decisions, failure policy)
//! - Event relay (publishing, background consumers, broker supervision)
//! - Subscription registry (event type to handlers)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod backoff;
pub mod circuit_breaker;
pub mod gate;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod relay;
