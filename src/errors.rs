use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Stable machine-readable code for the failure kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Not authorized: {0}")]
    AuthorizationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Quantity exceeds stock: requested {requested}, available {available}")]
    QuantityExceedsStock { requested: i32, available: i32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Checkout failed: {0}")]
    CheckoutError(Box<ServiceError>),

    #[error("Cart storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::StorageError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a failure that happened while placing an order.
    pub fn checkout(cause: ServiceError) -> Self {
        match cause {
            already @ ServiceError::CheckoutError(_) => already,
            other => ServiceError::CheckoutError(Box::new(other)),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationError(_) => StatusCode::FORBIDDEN,
            Self::ValidationError(_) | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::OutOfStock(_) | Self::QuantityExceedsStock { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CheckoutError(cause) => cause.status_code(),
            Self::DatabaseError(_)
            | Self::StorageError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationError(_) => "authentication_error",
            Self::AuthorizationError(_) => "authorization_error",
            Self::ValidationError(_) => "validation_error",
            Self::OutOfStock(_) => "out_of_stock",
            Self::QuantityExceedsStock { .. } => "quantity_exceeds_stock",
            Self::NotFound(_) => "not_found",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::CheckoutError(_) => "checkout_error",
            Self::DatabaseError(_) => "backend_error",
            Self::StorageError(_) | Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::StorageError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::CheckoutError(cause) => format!("Checkout failed: {}", cause.response_message()),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: Some(self.code().to_string()),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
