//! Error types shared across the gate and the relay.
//!
//! Errors are handled where they occur: store errors become an admission
//! decision through the failure policy, broker errors become log entries and
//! handler failures are retried and isolated. None of them is allowed to
//! crash the process.

use std::time::Duration;
use thiserror::Error;

/// Counting store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("counting store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer in time
    #[error("counting store timed out after {0:?}")]
    Timeout(Duration),
    /// The store answered with something unexpected
    #[error("counting store error: {0}")]
    Backend(String),
}

/// Message broker failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker could not be reached
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// The broker did not answer in time
    #[error("broker timed out after {0:?}")]
    Timeout(Duration),
    /// An event could not be encoded or decoded
    #[error("event codec error: {0}")]
    Codec(String),
    /// The relay or broker has been shut down
    #[error("broker closed")]
    Closed,
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Codec(e.to_string())
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for BrokerError {
    fn from(e: redis::RedisError) -> Self {
        BrokerError::Unavailable(e.to_string())
    }
}

/// Outcome of a single failed handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerFailure {
    /// The handler returned an error
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler panicked
    #[error("handler panicked")]
    Panicked,
    /// The handler exceeded its time budget
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

/// Background tasks did not stop cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// Tasks were still running when the shutdown timeout elapsed
    #[error("{pending} task(s) still running after {timeout:?}")]
    Timeout {
        /// Tasks that had not finished
        pending: usize,
        /// How long shutdown waited
        timeout: Duration,
    },
    /// A task panicked while stopping
    #[error("background task panicked: {0}")]
    TaskPanicked(String),
}

/// Error returned when a builder is given an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A timeout of zero would fail every call
    #[error("{0} must be greater than 0")]
    ZeroTimeout(&'static str),
    /// Backoff settings are inconsistent
    #[error("invalid backoff: {0}")]
    InvalidBackoff(&'static str),
    /// Store key prefix is empty
    #[error("key prefix must not be empty")]
    EmptyKeyPrefix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StoreError::Timeout(Duration::from_millis(250)).to_string(),
            "counting store timed out after 250ms"
        );
        assert_eq!(
            ShutdownError::Timeout {
                pending: 2,
                timeout: Duration::from_secs(5)
            }
            .to_string(),
            "2 task(s) still running after 5s"
        );
        assert_eq!(
            BuildError::ZeroTimeout("store_timeout").to_string(),
            "store_timeout must be greater than 0"
        );
    }

    #[test]
    fn test_codec_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(BrokerError::from(err), BrokerError::Codec(_)));
    }
}
