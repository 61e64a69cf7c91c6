//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of application logic.

pub mod clock;
pub mod handler;
pub mod layer;
pub mod store;

pub use clock::MockClock;
pub use handler::{HandlerMode, RecordingHandler};
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use store::{SlowStore, UnreachableStore};
