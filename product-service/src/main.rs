//! Serve products, keep their copied owner details in sync with `user-updates`, and announce
//! product changes on `product-updates`.
use std::sync::Arc;

use anyhow::Context;
use common_cache::{CacheAside, CacheStore, RedisCacheStore};
use common_catalog::HttpCatalogClient;
use common_channel::{ChangePublisher, MessageChannel, PgChannel, Propagator};
use common_metrics::{serve, setup_metrics_routes};
use common_models::{UserRecord, USER_UPDATES};
use envconfig::Envconfig;
use health::HealthRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use product_service::config::Config;
use product_service::handlers::{router, AppState};
use product_service::propagation::OwnerChangeHandler;
use product_service::repository::{PgProductRepository, ProductRepository};

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
    let products: Arc<dyn ProductRepository> = Arc::new(PgProductRepository::new(db));

    let cache: Arc<dyn CacheStore> = Arc::new(
        RedisCacheStore::new(&config.cache)
            .await
            .context("failed to create redis client")?,
    );
    let cache_config = config.cache.cache_config();
    let users = HttpCatalogClient::<UserRecord>::new(
        &config.owner_service_url,
        "users",
        config.catalog_timeout.0,
    )
    .context("failed to create owner service client")?;
    let owners = CacheAside::new(cache.clone(), Arc::new(users), cache_config.clone());

    let channel = PgChannel::new(&config.channel, config.service_name.as_str())
        .context("failed to create channel pool")?;
    let janitor = tokio::spawn(
        channel
            .clone()
            .run_janitor(config.channel.clone(), shutdown.clone()),
    );
    let channel: Arc<dyn MessageChannel> = Arc::new(channel);

    let liveness = HealthRegistry::new("liveness");
    let propagator = Propagator::new(
        channel.clone(),
        USER_UPDATES,
        Arc::new(OwnerChangeHandler::new(
            products.clone(),
            cache,
            cache_config,
        )),
        config.channel.propagator_config(),
        liveness
            .register("user-updates-propagator", config.liveness_deadline.0)
            .await,
    );
    let propagator = tokio::spawn(propagator.run(shutdown.clone()));

    let state = AppState {
        products,
        owners,
        publisher: ChangePublisher::new(channel),
    };
    let app = common_server::add_service_layers(
        router(state, Some(liveness)),
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app).context("failed to install metrics recorder")?;

    let bind = config.bind();
    info!(%bind, "product-service listening");
    let stop = shutdown.clone();
    serve(app, &bind, async move { stop.cancelled().await })
        .await
        .context("server failed")?;

    shutdown.cancel();
    propagator.await.context("propagator task failed")?;
    janitor.await.context("janitor task failed")?;
    Ok(())
}
