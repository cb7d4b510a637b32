use crate::{config::AppConfig, ApiResponse};
use axum::{http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};

/// Standard created response
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Standard success response
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Standard no content response
pub fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Pagination parameters for list operations
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PaginationParams {
    /// Page number (1-based) and page size clamped to the configured bounds
    pub fn resolve(&self, config: &AppConfig) -> (u64, u64) {
        (self.page.unwrap_or(1).max(1), config.page_size(self.per_page))
    }
}
