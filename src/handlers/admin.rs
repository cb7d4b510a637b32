use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{activity_log, ProfileView, UserRole},
    errors::ServiceError,
    handlers::common::{ok, PaginationParams},
    services::{activity::ActivityFilter, dashboard::UserFilter},
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserListQuery {
    pub role: Option<UserRole>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivityQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<ProfileView>>>, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(&state.config);

    let filter = UserFilter {
        role: query.role,
        page,
        per_page,
    };
    let (items, total) = state.services.dashboard.list_users(&user, filter).await?;
    Ok(ok(PaginatedResponse::new(items, total, page, per_page)))
}

/// Most recent activity log entries, newest first
pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<activity_log::Model>>>, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(&state.config);

    let filter = ActivityFilter {
        user_id: query.user_id,
        action: query.action,
        page,
        per_page,
    };
    let (items, total) = state.services.activity.recent(&user, filter).await?;
    Ok(ok(PaginatedResponse::new(items, total, page, per_page)))
}
