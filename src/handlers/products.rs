use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    entities::{product, ProductStatus},
    errors::ServiceError,
    handlers::common::{created, no_content, ok, PaginationParams},
    services::catalog::{ProductFilter, ProductInput},
    ApiResponse, AppState, PaginatedResponse,
};

/// Query string accepted by the product list
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProductListQuery {
    pub search: Option<String>,
    pub category_id: Option<i32>,
    pub status: Option<ProductStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductStatusRequest {
    pub status: ProductStatus,
}

/// List products visible to the caller
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<product::Model>>>, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(&state.config);
    let filter = ProductFilter {
        search: query.search,
        category_id: query.category_id,
        status: query.status,
        page,
        per_page,
    };

    let (items, total) = state.services.catalog.list_products(&user, filter).await?;
    Ok(ok(PaginatedResponse::new(items, total, page, per_page)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<product::Model>>, ServiceError> {
    let product = state.services.catalog.get_product(&user, product_id).await?;
    Ok(ok(product))
}

pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ProductInput>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ServiceError> {
    let product = state.services.catalog.create_product(&user, payload).await?;
    Ok(created(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
    Json(payload): Json<ProductInput>,
) -> Result<Json<ApiResponse<product::Model>>, ServiceError> {
    let product = state
        .services
        .catalog
        .update_product(&user, product_id, payload)
        .await?;
    Ok(ok(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.catalog.delete_product(&user, product_id).await?;
    Ok(no_content())
}

/// Approve or reject a listing
pub async fn set_product_status(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
    Json(payload): Json<ProductStatusRequest>,
) -> Result<Json<ApiResponse<product::Model>>, ServiceError> {
    let product = state
        .services
        .catalog
        .set_product_status(&user, product_id, payload.status)
        .await?;
    Ok(ok(product))
}
