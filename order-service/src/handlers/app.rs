use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use common_cache::{BatchResolver, CacheAside};
use common_models::{ProductRecord, UserRecord};
use health::HealthRegistry;

use crate::repository::OrderRepository;

use super::orders;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub users: CacheAside<UserRecord>,
    pub products: BatchResolver<ProductRecord>,
}

pub fn router(state: AppState, liveness: Option<HealthRegistry>) -> Router {
    let api = Router::new()
        .route("/orders", post(orders::place_order))
        .route(
            "/orders/:id",
            get(orders::get_order).patch(orders::update_order_status),
        )
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/users/:user_id/orders", get(orders::list_user_orders))
        .with_state(state);

    common_server::add_health_routes(api, "order-service", liveness)
}
