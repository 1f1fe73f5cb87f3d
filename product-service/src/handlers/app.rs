use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use common_cache::CacheAside;
use common_channel::ChangePublisher;
use common_models::UserRecord;
use health::HealthRegistry;

use crate::repository::ProductRepository;

use super::{internal, products};

#[derive(Clone)]
pub struct AppState {
    pub products: Arc<dyn ProductRepository>,
    pub owners: CacheAside<UserRecord>,
    pub publisher: ChangePublisher,
}

pub fn router(state: AppState, liveness: Option<HealthRegistry>) -> Router {
    let api = Router::new()
        .route(
            "/products",
            post(products::create_product).get(products::list_products),
        )
        .route(
            "/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/internal/products/batch",
            post(internal::get_product_records),
        )
        .route("/internal/products/:id", get(internal::get_product_record))
        .with_state(state);

    common_server::add_health_routes(api, "product-service", liveness)
}
