use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    auth::AuthUser,
    entities::rating,
    errors::ServiceError,
    handlers::common::{created, ok},
    services::ratings::{RatingInput, RatingSubmission, RatingSummary, ReviewView},
    ApiResponse, AppState,
};

pub async fn submit_rating(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
    Json(payload): Json<RatingInput>,
) -> Result<(StatusCode, Json<ApiResponse<RatingSubmission>>), ServiceError> {
    let submission = state.services.ratings.submit(&user, product_id, payload).await?;
    Ok(created(submission))
}

pub async fn list_ratings(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<rating::Model>>>, ServiceError> {
    let ratings = state.services.ratings.product_ratings(&user, product_id).await?;
    Ok(ok(ratings))
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<ReviewView>>>, ServiceError> {
    let reviews = state.services.ratings.product_reviews(&user, product_id).await?;
    Ok(ok(reviews))
}

pub async fn product_average(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    user: AuthUser,
) -> Result<Json<ApiResponse<RatingSummary>>, ServiceError> {
    let summary = state.services.ratings.average_for(&user, product_id).await?;
    Ok(ok(summary))
}

/// Average rating of every visible rated product
pub async fn averages(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<RatingSummary>>>, ServiceError> {
    let summaries = state.services.ratings.averages(&user).await?;
    Ok(ok(summaries))
}
