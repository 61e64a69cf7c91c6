//! Search service: indexes posts from `post.created` and `post.deleted`.

use admission_relay::config::ServiceConfig;
use admission_relay::services::search::{self, SearchIndex};
use admission_relay::services::ServiceContext;
use admission_relay::{server, telemetry};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config =
        ServiceConfig::from_env("search-service", 3004).context("invalid configuration")?;
    let gate = server::redis_gate(&config)?;
    let relay = server::redis_relay(&config)?;

    let index = SearchIndex::new();
    search::subscribe(&relay, &index);

    let ctx = ServiceContext::new(config.service_name.clone(), config.port, gate, relay.clone())
        .with_client_ip(config.client_ip_source());
    let app = search::router(ctx, index);

    server::serve(&config, app, relay).await?;
    Ok(())
}
