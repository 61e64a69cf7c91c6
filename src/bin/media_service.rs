//! Media service: media catalogue, cleans up after `post.deleted`.

use admission_relay::config::ServiceConfig;
use admission_relay::services::media::{self, MediaLibrary};
use admission_relay::services::ServiceContext;
use admission_relay::{server, telemetry};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = ServiceConfig::from_env("media-service", 3003).context("invalid configuration")?;
    let gate = server::redis_gate(&config)?;
    let relay = server::redis_relay(&config)?;

    let library = MediaLibrary::new();
    media::subscribe(&relay, &library);

    let ctx = ServiceContext::new(config.service_name.clone(), config.port, gate, relay.clone())
        .with_client_ip(config.client_ip_source());
    let app = media::router(ctx, library);

    server::serve(&config, app, relay).await?;
    Ok(())
}
