//! Process bootstrap shared by the service binaries.

use crate::application::relay::EventRelay;
use crate::config::ServiceConfig;
use crate::error::BuildError;
use axum::Router;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

#[cfg(feature = "redis-storage")]
use crate::application::gate::RateLimiterGate;
#[cfg(feature = "redis-storage")]
use crate::infrastructure::redis_broker::{RedisBrokerConfig, RedisStreamsBroker};
#[cfg(feature = "redis-storage")]
use crate::infrastructure::redis_store::RedisStore;
#[cfg(feature = "redis-storage")]
use std::sync::Arc;

/// Errors while starting or running a service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A component rejected its settings
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A Redis URL is malformed
    #[cfg(feature = "redis-storage")]
    #[error("invalid redis url: {0}")]
    Redis(#[from] redis::RedisError),

    /// The listen address is unavailable
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Gate over the Redis counting store described by `config`.
///
/// Does not connect; the first admission check does.
#[cfg(feature = "redis-storage")]
pub fn redis_gate(config: &ServiceConfig) -> Result<RateLimiterGate, ServerError> {
    let store = RedisStore::open(&config.redis_url)?;

    let gate = RateLimiterGate::builder(Arc::new(store))
        .with_policies(config.policies)
        .with_key_prefix(config.key_prefix.clone())
        .with_store_timeout(config.store_timeout)
        .with_failure_policy(config.failure_policy)
        .build()?;
    Ok(gate)
}

/// Relay over Redis Streams, consuming as the service's group.
///
/// Not started; [`serve`] starts it.
#[cfg(feature = "redis-storage")]
pub fn redis_relay(config: &ServiceConfig) -> Result<EventRelay, ServerError> {
    let broker = RedisStreamsBroker::open(
        &config.broker_url,
        RedisBrokerConfig::for_service(config.service_name.clone()),
    )?;

    let relay = EventRelay::builder(Arc::new(broker))
        .with_config(config.relay_config())
        .build()?;
    Ok(relay)
}

/// Serve `router` until ctrl-c or SIGTERM, then stop the relay.
///
/// The listener is bound before the relay starts, so the service answers
/// requests while the broker connection is still being established.
pub async fn serve(
    config: &ServiceConfig,
    router: Router,
    relay: EventRelay,
) -> Result<(), ServerError> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!(service = %config.service_name, %addr, "service listening");
    relay.start();

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(ServerError::Serve)?;

    tracing::info!(service = %config.service_name, "shutting down");
    if let Err(error) = relay.shutdown().await {
        tracing::warn!(%error, "event relay did not stop cleanly");
    }
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
