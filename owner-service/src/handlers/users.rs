use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use common_channel::{CorrelationId, Headers};
use common_models::{UserChange, UserRecord, UserRole, USER_UPDATES};
use common_server::ApiError;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::repository::{NewUser, UserUpdate};

use super::AppState;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UpdateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::not_found(format!("user {id} not found"))
}

fn require_names(first_name: &str, last_name: &str) -> Result<(), ApiError> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(ApiError::bad_request("first_name and last_name are required"));
    }
    Ok(())
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserRecord>), ApiError> {
    require_names(&request.first_name, &request.last_name)?;
    if !request.email.contains('@') {
        return Err(ApiError::bad_request("email is invalid"));
    }

    let user = state
        .users
        .create(NewUser {
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            phone: request.phone,
            role: UserRole::User,
        })
        .await?;

    info!(user_id = %user.id, "created user");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserRecord>>, ApiError> {
    Ok(Json(state.users.list().await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserRecord>, ApiError> {
    state
        .users
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// Update the user, then announce the new snapshot on `user-updates`. Publishing is best effort.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserRecord>, ApiError> {
    require_names(&request.first_name, &request.last_name)?;
    let current = state.users.get(id).await?.ok_or_else(|| not_found(id))?;

    let update = UserUpdate {
        phone: request.phone.unwrap_or_else(|| current.phone.clone()),
        is_active: request.is_active.unwrap_or(current.is_active),
        first_name: request.first_name,
        last_name: request.last_name,
    };
    let contact_is_updated = update.first_name != current.first_name
        || update.last_name != current.last_name
        || update.phone != current.phone;
    if !contact_is_updated && update.is_active == current.is_active {
        return Err(ApiError::bad_request("there are no changes to update"));
    }

    let updated = state
        .users
        .update(id, update)
        .await?
        .ok_or_else(|| not_found(id))?;

    let change = UserChange {
        user: updated.clone(),
        contact_is_updated,
    };
    state
        .publisher
        .publish_change(USER_UPDATES, &change, Headers::with_correlation(&correlation_id))
        .await;

    Ok(Json(updated))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.users.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
