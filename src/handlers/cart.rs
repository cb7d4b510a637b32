use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{no_content, ok},
    services::cart::CartView,
    ApiResponse, AppState,
};

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: i32,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.get_cart(&user).await?;
    Ok(ok(cart.into()))
}

pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    payload.validate()?;
    let cart = state
        .services
        .carts
        .add_to_cart(&user, payload.product_id, payload.quantity)
        .await?;
    Ok(ok(cart.into()))
}

/// Set a line's quantity; zero or less removes the line
pub async fn update_item(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state
        .services
        .carts
        .update_quantity(&user, product_id, payload.quantity)
        .await?;
    Ok(ok(cart.into()))
}

pub async fn remove_item(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.remove_from_cart(&user, product_id).await?;
    Ok(ok(cart.into()))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.carts.clear_cart(&user).await?;
    Ok(no_content())
}
