//! Serve orders, resolving users and products through the shared cache, and keep the product
//! names copied onto order items in sync with `product-updates`.
use std::sync::Arc;

use anyhow::Context;
use common_cache::{BatchResolver, CacheAside, CacheStore, RedisCacheStore};
use common_catalog::HttpCatalogClient;
use common_channel::{PgChannel, Propagator};
use common_metrics::{serve, setup_metrics_routes};
use common_models::{ProductRecord, UserRecord, PRODUCT_UPDATES};
use envconfig::Envconfig;
use health::HealthRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use order_service::config::Config;
use order_service::handlers::{router, AppState};
use order_service::propagation::ProductChangeHandler;
use order_service::repository::{OrderRepository, PgOrderRepository};

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
    let orders: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(db));

    let cache: Arc<dyn CacheStore> = Arc::new(
        RedisCacheStore::new(&config.cache)
            .await
            .context("failed to create redis client")?,
    );
    let cache_config = config.cache.cache_config();
    let user_catalog = HttpCatalogClient::<UserRecord>::new(
        &config.owner_service_url,
        "users",
        config.catalog_timeout.0,
    )
    .context("failed to create owner service client")?;
    let product_catalog = HttpCatalogClient::<ProductRecord>::new(
        &config.product_service_url,
        "products",
        config.catalog_timeout.0,
    )
    .context("failed to create product service client")?;

    let channel = PgChannel::new(&config.channel, config.service_name.as_str())
        .context("failed to create channel pool")?;
    let janitor = tokio::spawn(
        channel
            .clone()
            .run_janitor(config.channel.clone(), shutdown.clone()),
    );

    let liveness = HealthRegistry::new("liveness");
    let propagator = Propagator::new(
        Arc::new(channel),
        PRODUCT_UPDATES,
        Arc::new(ProductChangeHandler::new(
            orders.clone(),
            cache.clone(),
            cache_config.clone(),
        )),
        config.channel.propagator_config(),
        liveness
            .register("product-updates-propagator", config.liveness_deadline.0)
            .await,
    );
    let propagator = tokio::spawn(propagator.run(shutdown.clone()));

    let state = AppState {
        orders,
        users: CacheAside::new(cache.clone(), Arc::new(user_catalog), cache_config.clone()),
        products: BatchResolver::new(cache, Arc::new(product_catalog), cache_config),
    };
    let app = common_server::add_service_layers(
        router(state, Some(liveness)),
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app).context("failed to install metrics recorder")?;

    let bind = config.bind();
    info!(%bind, "order-service listening");
    let stop = shutdown.clone();
    serve(app, &bind, async move { stop.cancelled().await })
        .await
        .context("server failed")?;

    shutdown.cancel();
    propagator.await.context("propagator task failed")?;
    janitor.await.context("janitor task failed")?;
    Ok(())
}
