use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use common_channel::ChangePublisher;

use crate::repository::UserRepository;

use super::{internal, users};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub publisher: ChangePublisher,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", post(users::create_user).get(users::list_users))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/internal/users/batch", post(internal::get_user_records))
        .route("/internal/users/:id", get(internal::get_user_record))
        .with_state(state);

    common_server::add_health_routes(api, "owner-service", None)
}
