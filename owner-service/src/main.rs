//! Serve user accounts and announce their changes on `user-updates`.
use std::sync::Arc;

use anyhow::Context;
use common_channel::{ChangePublisher, PgChannel};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use owner_service::config::Config;
use owner_service::handlers::{router, AppState};
use owner_service::repository::PgUserRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;
    common_server::init_tracing(config.log_json);

    let shutdown = CancellationToken::new();
    common_server::install_shutdown_handler(shutdown.clone())?;

    let db = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect_lazy(&config.database_url)
        .context("invalid DATABASE_URL")?;
    let channel = PgChannel::new(&config.channel, config.service_name.as_str())
        .context("failed to create channel pool")?;
    let janitor = tokio::spawn(
        channel
            .clone()
            .run_janitor(config.channel.clone(), shutdown.clone()),
    );

    let state = AppState {
        users: Arc::new(PgUserRepository::new(db)),
        publisher: ChangePublisher::new(Arc::new(channel)),
    };
    let app = common_server::add_service_layers(
        router(state),
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app).context("failed to install metrics recorder")?;

    let bind = config.bind();
    info!(%bind, "owner-service listening");
    let stop = shutdown.clone();
    serve(app, &bind, async move { stop.cancelled().await })
        .await
        .context("server failed")?;

    shutdown.cancel();
    janitor.await.context("janitor task failed")?;
    Ok(())
}
