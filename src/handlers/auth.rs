use axum::{extract::State, http::StatusCode, response::Json};

use crate::{
    auth::{AuthSession, AuthUser, SignInRequest, SignUpRequest},
    entities::ProfileView,
    errors::ServiceError,
    handlers::common::{created, no_content, ok},
    ApiResponse, AppState,
};

/// Register a Farmer or Buyer profile and sign it in
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthSession>>), ServiceError> {
    let session = state.auth.sign_up(payload).await?;
    Ok(created(session))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<ApiResponse<AuthSession>>, ServiceError> {
    let session = state.auth.sign_in(payload).await?;
    Ok(ok(session))
}

/// Revoke the presented access token
pub async fn sign_out(State(state): State<AppState>, user: AuthUser) -> StatusCode {
    state.auth.sign_out(&user);
    no_content()
}

/// Profile of the signed-in caller; served at both `/auth/me` and `/profile`
pub async fn current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<ProfileView>>, ServiceError> {
    let profile = state.auth.current_user(&user).await?;
    Ok(ok(profile))
}
