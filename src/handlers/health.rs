use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::{ApiResponse, AppState};

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub database: ComponentHealth,
    pub feed_subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
}

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

pub async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::success(StatusResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
    }))
}

/// Readiness: 503 when the database does not answer a ping
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let database = match state.db.ping().await {
        Ok(()) => ComponentHealth {
            status: ComponentStatus::Up,
            message: "Database connection is healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Err(e) => {
            tracing::error!(error = %e, "database health check failed");
            ComponentHealth {
                status: ComponentStatus::Down,
                message: "Database is unreachable".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    let status = database.status;
    let code = if status == ComponentStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: uptime_secs(),
            database,
            feed_subscribers: state.subscriptions.feed().receiver_count(),
        }),
    )
}
