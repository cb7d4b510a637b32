mod common;

use agrimarket_api::{
    entities::{OrderState, UserRole},
    errors::ServiceError,
    services::{
        activity::ActivityFilter,
        dashboard::{DashboardStats, UserFilter},
    },
};
use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, TestUser};
use rust_decimal_macros::dec;

async fn order(app: &TestApp, buyer: &TestUser, product_id: i32, quantity: i32) -> i32 {
    app.state
        .services
        .carts
        .add_to_cart(&buyer.user, product_id, quantity)
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .checkout(&buyer.user)
        .await
        .unwrap()
        .order_id
}

#[tokio::test]
async fn admin_totals() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;
    let dashboard = &app.state.services.dashboard;

    let oil = app
        .approved_product(&farmer, &admin, "Rapeseed oil", dec!(6.50), 20)
        .await;
    let salad = app
        .approved_product(&farmer, &admin, "Salad leaves", dec!(2.00), 12)
        .await;
    let category = app.category(&admin, "Bakery").await;
    app.state
        .services
        .catalog
        .create_product(
            &farmer.user,
            TestApp::product_input("Sourdough", dec!(4.00), 3, category.category_id),
        )
        .await
        .unwrap();

    order(&app, &buyer, oil.product_id, 2).await;
    let cancelled = order(&app, &buyer, salad.product_id, 4).await;
    app.state
        .services
        .orders
        .set_order_status(&admin.user, cancelled, OrderState::Cancelled.id())
        .await
        .unwrap();
    order(&app, &buyer, salad.product_id, 5).await;

    let stats = match dashboard.stats_for(&admin.user).await.unwrap() {
        DashboardStats::Admin(stats) => stats,
        other => panic!("expected admin stats, got {:?}", other),
    };
    assert_eq!(stats.total_users, 3);
    assert_eq!(stats.farmers, 1);
    assert_eq!(stats.buyers, 1);
    assert_eq!(stats.total_products, 3);
    assert_eq!(stats.pending_products, 1);
    // Sourdough (3) and salad (12 - 5 = 7) sit under the threshold of 10.
    assert_eq!(stats.low_stock_products, 2);
    assert_eq!(stats.total_orders, 3);
    assert_eq!(stats.revenue.round_dp(2), dec!(23.00));
    assert_eq!(stats.recent_orders.len(), 3);
}

#[tokio::test]
async fn farmer_sales_cover_only_their_lines() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let grower = app.farmer().await;
    let neighbour = app.farmer().await;
    let buyer = app.buyer().await;

    let apricots = app
        .approved_product(&grower, &admin, "Apricots", dec!(3.00), 30)
        .await;
    let cider = app
        .approved_product(&neighbour, &admin, "Cider", dec!(5.00), 30)
        .await;

    let carts = &app.state.services.carts;
    carts.add_to_cart(&buyer.user, apricots.product_id, 2).await.unwrap();
    carts.add_to_cart(&buyer.user, cider.product_id, 1).await.unwrap();
    app.state.services.checkout.checkout(&buyer.user).await.unwrap();
    order(&app, &buyer, cider.product_id, 3).await;

    let stats = match app.state.services.dashboard.stats_for(&grower.user).await.unwrap() {
        DashboardStats::Farmer(stats) => stats,
        other => panic!("expected farmer stats, got {:?}", other),
    };
    assert_eq!(stats.product_count, 1);
    assert_eq!(stats.approved_products, 1);
    assert_eq!(stats.order_count, 1);
    assert_eq!(stats.sales.round_dp(2), dec!(6.00));
    assert!(stats.low_stock.is_empty());
    assert_eq!(stats.recent_orders.len(), 1);
}

#[tokio::test]
async fn buyer_spending() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    let nuts = app
        .approved_product(&farmer, &admin, "Cobnuts", dec!(4.40), 10)
        .await;
    let delivered = order(&app, &buyer, nuts.product_id, 1).await;
    let cancelled = order(&app, &buyer, nuts.product_id, 2).await;
    order(&app, &buyer, nuts.product_id, 1).await;

    let orders = &app.state.services.orders;
    orders
        .set_order_status(&farmer.user, delivered, OrderState::Delivered.id())
        .await
        .unwrap();
    orders
        .set_order_status(&farmer.user, cancelled, OrderState::Cancelled.id())
        .await
        .unwrap();

    let stats = match app.state.services.dashboard.stats_for(&buyer.user).await.unwrap() {
        DashboardStats::Buyer(stats) => stats,
        other => panic!("expected buyer stats, got {:?}", other),
    };
    assert_eq!(stats.order_count, 3);
    assert_eq!(stats.open_orders, 1);
    assert_eq!(stats.total_spent.round_dp(2), dec!(8.80));
    assert_eq!(stats.available_products, 1);
}

#[tokio::test]
async fn user_directory_is_admin_only() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    app.buyer().await;
    app.buyer().await;
    let dashboard = &app.state.services.dashboard;

    let (buyers, total) = dashboard
        .list_users(
            &admin.user,
            UserFilter {
                role: Some(UserRole::Buyer),
                page: 1,
                per_page: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(buyers.iter().all(|u| u.role == UserRole::Buyer));

    let err = dashboard
        .list_users(&farmer.user, UserFilter::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AuthorizationError(_));

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/users?role=Farmer&per_page=5",
            None,
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 5);
}

#[tokio::test]
async fn activity_log_records_events() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    let thyme = app
        .approved_product(&farmer, &admin, "Lemon thyme", dec!(1.25), 6)
        .await;
    order(&app, &buyer, thyme.product_id, 2).await;

    let activity = &app.state.services.activity;
    let admin_user = &admin.user;
    let buyer_id = buyer.user.user_id;
    let logged = app
        .eventually(|| async move {
            activity
                .recent(
                    admin_user,
                    ActivityFilter {
                        user_id: Some(buyer_id),
                        action: Some("order_placed".to_string()),
                        page: 1,
                        per_page: 10,
                    },
                )
                .await
                .map(|(entries, total)| total == 1 && entries.len() == 1)
                .unwrap_or(false)
        })
        .await;
    assert!(logged, "order_placed should reach the activity log");

    // Stock fell to 4, under the threshold.
    let low = app
        .eventually(|| async move {
            activity
                .recent(
                    admin_user,
                    ActivityFilter {
                        action: Some("stock_low".to_string()),
                        page: 1,
                        per_page: 10,
                        ..Default::default()
                    },
                )
                .await
                .map(|(_, total)| total == 1)
                .unwrap_or(false)
        })
        .await;
    assert!(low);

    let err = activity
        .recent(&buyer.user, ActivityFilter::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AuthorizationError(_));

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/activity?action=product_created",
            None,
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["total"], 1);
}

#[tokio::test]
async fn dashboard_endpoint_matches_role() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    for (user, view, role) in [
        (&admin, "admin", "admin"),
        (&farmer, "farmer", "farmer"),
        (&buyer, "buyer", "buyer"),
    ] {
        let response = app
            .request(Method::GET, "/api/v1/dashboard", None, Some(&user.token))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["data"]["view"], view);
        assert_eq!(body["data"]["stats"]["role"], role);
        assert!(body["data"]["sections"].as_array().is_some_and(|s| !s.is_empty()));
    }

    let titled = response_json(
        app.request(Method::GET, "/api/v1/dashboard", None, Some(&farmer.token))
            .await,
    )
    .await;
    assert_eq!(titled["data"]["title"], "Farmer Dashboard");
}
