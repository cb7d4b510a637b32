use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::ok,
    services::dashboard::DashboardStats,
    views::{view_for, DashboardView},
    ApiResponse, AppState,
};

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub view: DashboardView,
    pub title: &'static str,
    pub sections: &'static [&'static str],
    pub stats: DashboardStats,
}

/// The caller's role-specific dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<DashboardResponse>>, ServiceError> {
    let view = view_for(user.role);
    let stats = state.services.dashboard.stats_for(&user).await?;
    Ok(ok(DashboardResponse {
        view,
        title: view.title(),
        sections: view.sections(),
        stats,
    }))
}
