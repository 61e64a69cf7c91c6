//! Domain layer - pure types with no I/O.
//!
//! This layer contains the core concepts and invariants of admission control
//! and event propagation:
//! - Tiers and their point budgets
//! - Per-client fixed-window budgets
//! - Client identity and store keys
//! - Domain events exchanged between services
//!
//! All types in this layer are pure and easily testable.

pub mod budget;
pub mod event;
pub mod key;
pub mod tier;
