#![allow(dead_code)]

use std::time::Duration;

use agrimarket_api::{
    auth::{AuthUser, SignUpRequest},
    build_router,
    config::AppConfig,
    db,
    entities::{category, product, ProductStatus, UserRole},
    events,
    services::catalog::{CategoryInput, ProductInput},
    AppState,
};
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_agrimarket_integration_runs";

/// A signed-in profile: its bearer token and the decoded caller.
#[derive(Clone, Debug)]
pub struct TestUser {
    pub token: String,
    pub user: AuthUser,
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (state, event_rx) = AppState::build(cfg, db_arc.clone());
        let event_task = tokio::spawn(events::process_events(event_rx, db_arc));

        Self {
            router: build_router(state.clone()),
            state,
            _event_task: event_task,
        }
    }

    /// Register a Farmer or Buyer through the auth service.
    pub async fn sign_up(&self, role: UserRole, name: &str) -> TestUser {
        let email = format!(
            "{}-{}@agrimarket.test",
            name.to_lowercase().replace(' ', "."),
            Uuid::new_v4().simple()
        );
        let session = self
            .state
            .auth
            .sign_up(SignUpRequest {
                email,
                password: "correct horse battery".to_string(),
                name: name.to_string(),
                role,
            })
            .await
            .expect("sign up test profile");
        self.user_for(session.token.access_token)
    }

    /// Admins cannot self-register, so create one directly.
    pub async fn admin(&self) -> TestUser {
        let email = format!("admin-{}@agrimarket.test", Uuid::new_v4().simple());
        let model = self
            .state
            .auth
            .create_profile(SignUpRequest {
                email,
                password: "correct horse battery".to_string(),
                name: "Admin".to_string(),
                role: UserRole::Admin,
            })
            .await
            .expect("create admin profile");
        let token = self.state.auth.issue_token(&model).expect("issue admin token");
        self.user_for(token.access_token)
    }

    pub async fn farmer(&self) -> TestUser {
        self.sign_up(UserRole::Farmer, "Fern Farmer").await
    }

    pub async fn buyer(&self) -> TestUser {
        self.sign_up(UserRole::Buyer, "Bea Buyer").await
    }

    fn user_for(&self, token: String) -> TestUser {
        let user = self.state.auth.validate_token(&token).expect("fresh token validates");
        TestUser { token, user }
    }

    pub async fn category(&self, admin: &TestUser, name: &str) -> category::Model {
        self.state
            .services
            .catalog
            .create_category(
                &admin.user,
                CategoryInput {
                    name: name.to_string(),
                    description: None,
                },
            )
            .await
            .expect("create category")
    }

    pub fn product_input(name: &str, price: Decimal, stock: i32, category_id: i32) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            description: format!("{} grown without shortcuts", name),
            image_url: None,
            price,
            stock,
            category_id,
        }
    }

    /// Create a product as `farmer` and approve it as `admin`.
    pub async fn approved_product(
        &self,
        farmer: &TestUser,
        admin: &TestUser,
        name: &str,
        price: Decimal,
        stock: i32,
    ) -> product::Model {
        let category = self.category(admin, &format!("{} category", name)).await;
        let catalog = &self.state.services.catalog;
        let created = catalog
            .create_product(
                &farmer.user,
                Self::product_input(name, price, stock, category.category_id),
            )
            .await
            .expect("create product");
        catalog
            .set_product_status(&admin.user, created.product_id, ProductStatus::Approved)
            .await
            .expect("approve product")
    }

    pub async fn stock_of(&self, product_id: i32) -> i32 {
        use sea_orm::EntityTrait;
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Poll until `check` passes or a couple of seconds elapse.
    pub async fn eventually<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Reads a decimal that the API serialized as a JSON string.
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .and_then(|s| s.parse::<Decimal>().ok())
        .or_else(|| value.as_f64().and_then(|f| Decimal::try_from(f).ok()))
        .expect("decimal value")
        .round_dp(2)
}
