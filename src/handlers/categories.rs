use axum::{extract::State, http::StatusCode, response::Json};

use crate::{
    auth::AuthUser,
    entities::category,
    errors::ServiceError,
    handlers::common::{created, ok},
    services::catalog::CategoryInput,
    ApiResponse, AppState,
};

pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<Vec<category::Model>>>, ServiceError> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(ok(categories))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CategoryInput>,
) -> Result<(StatusCode, Json<ApiResponse<category::Model>>), ServiceError> {
    let category = state.services.catalog.create_category(&user, payload).await?;
    Ok(created(category))
}
