use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use common_cache::AccessError;
use common_channel::{CorrelationId, Headers};
use common_models::{ProductChange, ProductRecord, ProductStatus, PRODUCT_UPDATES};
use common_server::ApiError;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::repository::{NewProduct, ProductUpdate};

use super::AppState;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i32,
    pub owner_id: Uuid,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UpdateProductRequest {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i32,
    pub status: Option<String>,
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::not_found(format!("product {id} not found"))
}

fn validate(name: &str, price: f64, quantity: i32, min_quantity: i32) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(ApiError::bad_request("price must be at least 0"));
    }
    if quantity < min_quantity {
        return Err(ApiError::bad_request(format!(
            "quantity must be at least {min_quantity}"
        )));
    }
    Ok(())
}

/// Create a product, copying its owner's contact details from the owner service.
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductRecord>), ApiError> {
    validate(&request.name, request.price, request.quantity, 1)?;

    let owner = match state.owners.get(request.owner_id).await {
        Ok(found) => found.value,
        Err(AccessError::NotFound { id, .. }) => {
            return Err(ApiError::bad_request(format!("owner {id} not found")))
        }
        Err(e) => return Err(ApiError::internal("failed to look up owner", e)),
    };

    let product = state
        .products
        .create(NewProduct {
            name: request.name,
            description: request.description,
            price: request.price,
            quantity: request.quantity,
            owner,
        })
        .await?;

    info!(product_id = %product.id, owner_id = %product.owner_id, "created product");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    Ok(Json(state.products.list().await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductRecord>, ApiError> {
    state
        .products
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// Update the product, then announce the new snapshot on `product-updates`. Publishing is best
/// effort: the update is committed either way.
pub async fn update_product(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<ProductRecord>, ApiError> {
    validate(&request.name, request.price, request.quantity, 0)?;
    let current = state.products.get(id).await?.ok_or_else(|| not_found(id))?;

    let status = match request.status.as_deref() {
        Some(status) => status
            .parse::<ProductStatus>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => current.status,
    };
    let update = ProductUpdate {
        name: request.name,
        description: request.description,
        price: request.price,
        quantity: request.quantity,
        status,
    };
    let unchanged = ProductUpdate {
        name: current.name.clone(),
        description: current.description.clone(),
        price: current.price,
        quantity: current.quantity,
        status: current.status,
    };
    if update == unchanged {
        return Err(ApiError::bad_request("there are no changes to update"));
    }

    let name_is_updated = update.name != current.name;
    let updated = state
        .products
        .update(id, update)
        .await?
        .ok_or_else(|| not_found(id))?;

    let change = ProductChange {
        product: updated.clone(),
        name_is_updated,
    };
    let headers =
        Headers::with_correlation(&correlation_id).with("name_is_updated", name_is_updated);
    state
        .publisher
        .publish_change(PRODUCT_UPDATES, &change, headers)
        .await;

    Ok(Json(updated))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.products.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
