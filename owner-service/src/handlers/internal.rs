//! Catalog endpoints read by the other services' cache-aside lookups.
use axum::extract::{Path, State};
use axum::Json;
use common_catalog::{BatchRequest, BatchResponse};
use common_models::UserRecord;
use common_server::ApiError;
use uuid::Uuid;

use super::AppState;

const MAX_BATCH_SIZE: usize = 1000;

pub async fn get_user_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserRecord>, ApiError> {
    state
        .users
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("user {id} not found")))
}

pub async fn get_user_records(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse<UserRecord>>, ApiError> {
    if request.ids.len() > MAX_BATCH_SIZE {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_BATCH_SIZE} ids per batch"
        )));
    }

    let items = state.users.get_many(&request.ids).await?;
    Ok(Json(BatchResponse { items }))
}
