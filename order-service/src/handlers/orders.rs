use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common_cache::ResolveError;
use common_server::ApiError;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::model::{Order, OrderStatus};
use crate::repository::{NewOrder, NewOrderItem, StatusChange};

use super::AppState;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlaceOrderRequest {
    pub user_id: Uuid,
    pub products: Vec<OrderLine>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UpdateOrderRequest {
    pub status: String,
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::not_found(format!("order {id} not found"))
}

fn validate(request: &PlaceOrderRequest) -> Result<(), ApiError> {
    if request.products.is_empty() {
        return Err(ApiError::bad_request("at least one product is required"));
    }

    let mut seen = HashSet::with_capacity(request.products.len());
    for line in &request.products {
        if line.quantity < 1 {
            return Err(ApiError::bad_request("quantity must be at least 1"));
        }
        if !seen.insert(line.product_id) {
            return Err(ApiError::bad_request(format!(
                "product {} is listed more than once",
                line.product_id
            )));
        }
    }
    Ok(())
}

/// Place an order for products resolved through the product cache, priced and named from
/// the resolved snapshots.
pub async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    validate(&request)?;

    match state.users.exists(request.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(ApiError::bad_request(format!(
                "user {} not found",
                request.user_id
            )))
        }
        Err(e) => return Err(ApiError::internal("failed to look up user", e)),
    }

    let ids: Vec<Uuid> = request.products.iter().map(|line| line.product_id).collect();
    let products = state
        .products
        .resolve_many(&ids)
        .await
        .and_then(|resolution| resolution.require_all())
        .map_err(|e| match e {
            ResolveError::NotFound(missing) => {
                let missing: Vec<String> = missing.iter().map(Uuid::to_string).collect();
                ApiError::bad_request(format!("products not found: {}", missing.join(", ")))
            }
            other => ApiError::internal("failed to resolve products", other),
        })?;

    let mut total_amount = 0.0;
    let mut items = Vec::with_capacity(products.len());
    for (line, product) in request.products.iter().zip(products) {
        if line.quantity > product.quantity {
            return Err(ApiError::bad_request(format!(
                "the quantity specified for '{}' is more than the quantity in stock: {} (specified) for {} (in stock)",
                product.name, line.quantity, product.quantity
            )));
        }

        total_amount += product.price * f64::from(line.quantity);
        items.push(NewOrderItem {
            product_id: product.id,
            product_name: product.name,
            quantity: line.quantity,
            unit_price: product.price,
            product_synced_at: product.updated_at,
        });
    }

    let order = state
        .orders
        .create(NewOrder {
            user_id: request.user_id,
            total_amount,
            items,
        })
        .await?;

    info!(order_id = %order.id, user_id = %order.user_id, items = order.items.len(), "placed order");
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    state
        .orders
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

pub async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.list_for_user(user_id).await?))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    let status = request
        .status
        .parse::<OrderStatus>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    match state.orders.update_status(id, status, None).await? {
        StatusChange::Updated(order) => Ok(Json(order)),
        StatusChange::NotFound => Err(not_found(id)),
        StatusChange::Rejected { current } => Err(ApiError::bad_request(format!(
            "order is {current} and cannot be updated"
        ))),
    }
}

/// Cancel an order that has not been processed yet.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let change = state
        .orders
        .update_status(id, OrderStatus::Cancelled, Some(OrderStatus::Pending))
        .await?;

    match change {
        StatusChange::Updated(order) => {
            info!(order_id = %order.id, "cancelled order");
            Ok(Json(order))
        }
        StatusChange::NotFound => Err(not_found(id)),
        StatusChange::Rejected { current } => Err(ApiError::bad_request(format!(
            "order is {current} and can no longer be cancelled"
        ))),
    }
}
