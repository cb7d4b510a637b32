use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::warn;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, ok, PaginationParams},
    services::orders::{OrderDetails, OrderFilter, StatusOutcome, StatusUpdate},
    views::{order_subscription, refetch_order},
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrderListQuery {
    pub status_id: Option<i32>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderStatusRequest {
    pub status_id: i32,
}

/// Place an order for the caller's cart
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetails>>), ServiceError> {
    let order = state.services.checkout.checkout(&user).await?;
    Ok(created(order))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderDetails>>>, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(&state.config);

    let filter = OrderFilter {
        status_id: query.status_id,
        page,
        per_page,
    };
    let (items, total) = state.services.orders.list_orders(&user, filter).await?;
    Ok(ok(PaginatedResponse::new(items, total, page, per_page)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let order = state.services.orders.get_order(&user, order_id).await?;
    Ok(ok(order))
}

pub async fn set_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    user: AuthUser,
    Json(payload): Json<OrderStatusRequest>,
) -> Result<Json<ApiResponse<StatusUpdate>>, ServiceError> {
    let update = state
        .services
        .orders
        .set_order_status(&user, order_id, payload.status_id)
        .await?;

    let mut response = ApiResponse::success(update);
    response.message = match response.data.as_ref().map(|u| u.outcome) {
        Some(StatusOutcome::AlreadyDelivered) => {
            Some("Order has already been delivered".to_string())
        }
        Some(StatusOutcome::Unchanged) => Some("Order already has this status".to_string()),
        _ => None,
    };
    Ok(Json(response))
}

/// Server-sent stream of order changes the caller may see.
///
/// Each event carries the re-fetched joined order, not the raw row.
pub async fn order_stream(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let orders = state.services.orders.clone();
    let changes = state.subscriptions.stream(order_subscription(&user));

    let events = changes
        .filter_map(move |change| {
            let orders = orders.clone();
            let user = user.clone();
            async move {
                match refetch_order(&orders, &user, &change).await {
                    Ok(Some(details)) => Event::default()
                        .event("order")
                        .id(details.order_id.to_string())
                        .json_data(&details)
                        .ok(),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(error = %e, "dropping order change from stream");
                        None
                    }
                }
            }
        })
        .map(Ok);

    Sse::new(events).keep_alive(KeepAlive::default())
}
