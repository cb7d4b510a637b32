//! agrimarket-api library
//!
//! Role-based farm marketplace: farmers list produce, admins moderate it,
//! buyers fill a cart and check out, and order status changes flow back to
//! every dashboard through a realtime change feed.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cart;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod realtime;
pub mod services;
pub mod tracing;
pub mod views;

use axum::{
    http::HeaderValue,
    response::Json,
    routing::{get, post, put},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::entities::UserRole;
use crate::events::{Event, EventSender};
use crate::realtime::{ChangeFeed, SubscriptionManager};
use crate::services::factory::{ServiceContainer, ServiceFactory};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub subscriptions: SubscriptionManager,
    pub services: ServiceContainer,
}

impl AppState {
    /// Wires every service over one connection, event channel and change feed.
    ///
    /// The returned receiver must be handed to [`events::process_events`].
    pub fn build(
        config: config::AppConfig,
        db: Arc<DatabaseConnection>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        let event_sender = Arc::new(event_sender);
        let feed = ChangeFeed::new(config.change_feed_capacity);

        let auth = Arc::new(AuthService::new(
            AuthConfig::from(&config),
            db.clone(),
            event_sender.clone(),
        ));
        let factory =
            ServiceFactory::from_config(&config, db.clone(), event_sender.clone(), feed.clone());
        let services = ServiceContainer::new(&factory);

        let state = Self {
            db,
            config,
            event_sender,
            auth,
            subscriptions: SubscriptionManager::new(feed),
            services,
        };
        (state, event_rx)
    }
}

/// Standard API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let limit = limit.max(1);
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every route under `/api/v1`, grouped by the roles allowed to call it
pub fn api_v1_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/auth/sign-up", post(handlers::auth::sign_up))
        .route("/auth/sign-in", post(handlers::auth::sign_in))
        .route("/status", get(handlers::health::api_status))
        .route("/health", get(handlers::health::health_check));

    let authenticated = Router::new()
        .route("/auth/sign-out", post(handlers::auth::sign_out))
        .route("/auth/me", get(handlers::auth::current_user))
        .route("/profile", get(handlers::auth::current_user))
        .route("/categories", get(handlers::categories::list_categories))
        .route("/products", get(handlers::products::list_products))
        .route("/products/:id", get(handlers::products::get_product))
        .route("/products/:id/ratings", get(handlers::ratings::list_ratings))
        .route(
            "/products/:id/ratings/average",
            get(handlers::ratings::product_average),
        )
        .route("/products/:id/reviews", get(handlers::ratings::list_reviews))
        .route("/ratings/averages", get(handlers::ratings::averages))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/stream", get(handlers::orders::order_stream))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/dashboard", get(handlers::dashboard::dashboard))
        .with_auth();

    let farmer = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route(
            "/products/:id",
            put(handlers::products::update_product).delete(handlers::products::delete_product),
        )
        .with_roles(&[UserRole::Farmer]);

    let buyer = Router::new()
        .route("/products/:id/ratings", post(handlers::ratings::submit_rating))
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:product_id",
            put(handlers::cart::update_item).delete(handlers::cart::remove_item),
        )
        .route("/checkout", post(handlers::orders::checkout))
        .with_roles(&[UserRole::Buyer]);

    let order_managers = Router::new()
        .route("/orders/:id/status", put(handlers::orders::set_order_status))
        .with_roles(&[UserRole::Admin, UserRole::Farmer]);

    let admin = Router::new()
        .route("/categories", post(handlers::categories::create_category))
        .route(
            "/products/:id/status",
            put(handlers::products::set_product_status),
        )
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/activity", get(handlers::admin::list_activity))
        .with_roles(&[UserRole::Admin]);

    public
        .merge(authenticated)
        .merge(farmer)
        .merge(buyer)
        .merge(order_managers)
        .merge(admin)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.is_development() {
        ::tracing::info!("Using permissive CORS in development");
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// Full application router with request ids, tracing, CORS and auth wiring
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors_layer(&state.config))
        // Auth middleware resolves tokens through this extension
        .layer(Extension(state.auth.clone()))
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}
