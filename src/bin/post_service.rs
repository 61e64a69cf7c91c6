//! Post service: `GET|POST /api/posts`, `GET|DELETE /api/posts/:id`.

use admission_relay::config::ServiceConfig;
use admission_relay::services::posts::{self, PostRepository};
use admission_relay::services::ServiceContext;
use admission_relay::{server, telemetry};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = ServiceConfig::from_env("post-service", 3002).context("invalid configuration")?;
    let gate = server::redis_gate(&config)?;
    let relay = server::redis_relay(&config)?;

    let ctx = ServiceContext::new(config.service_name.clone(), config.port, gate, relay.clone())
        .with_client_ip(config.client_ip_source());
    let app = posts::router(ctx, PostRepository::new());

    server::serve(&config, app, relay).await?;
    Ok(())
}
