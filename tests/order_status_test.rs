mod common;

use agrimarket_api::{
    entities::OrderState,
    errors::ServiceError,
    services::orders::{OrderDetails, StatusOutcome},
};
use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, TestUser};
use rstest::rstest;
use rust_decimal_macros::dec;
use serde_json::json;

struct Placed {
    app: TestApp,
    admin: TestUser,
    farmer: TestUser,
    buyer: TestUser,
    product_id: i32,
    order: OrderDetails,
}

/// One farmer's product with stock 10; the buyer has ordered 4.
async fn placed_order() -> Placed {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    let product = app
        .approved_product(&farmer, &admin, "Blueberries", dec!(4.80), 10)
        .await;
    app.state
        .services
        .carts
        .add_to_cart(&buyer.user, product.product_id, 4)
        .await
        .unwrap();
    let order = app
        .state
        .services
        .checkout
        .checkout(&buyer.user)
        .await
        .unwrap();

    Placed {
        app,
        admin,
        farmer,
        buyer,
        product_id: product.product_id,
        order,
    }
}

#[tokio::test]
async fn walks_forward_to_delivered() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    for state in [OrderState::Confirmed, OrderState::Shipped, OrderState::Delivered] {
        let update = orders
            .set_order_status(&p.farmer.user, p.order.order_id, state.id())
            .await
            .unwrap();
        assert_eq!(update.outcome, StatusOutcome::Updated);
        assert!(!update.restocked);
        assert_eq!(update.order.status, state.name());
        assert!(update.order.updated_at.is_some());
    }

    // Delivery has no stock effect.
    assert_eq!(p.app.stock_of(p.product_id).await, 6);

    let again = orders
        .set_order_status(&p.admin.user, p.order.order_id, OrderState::Delivered.id())
        .await
        .unwrap();
    assert_eq!(again.outcome, StatusOutcome::AlreadyDelivered);
    assert_eq!(again.order.status, "Delivered");
}

#[tokio::test]
async fn skipping_ahead_is_allowed() {
    let p = placed_order().await;

    let update = p
        .app
        .state
        .services
        .orders
        .set_order_status(&p.admin.user, p.order.order_id, OrderState::Shipped.id())
        .await
        .unwrap();
    assert_eq!(update.outcome, StatusOutcome::Updated);
    assert_eq!(update.order.status, "Shipped");
}

#[tokio::test]
async fn cancelling_restocks_once() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;
    assert_eq!(p.app.stock_of(p.product_id).await, 6);

    let cancelled = orders
        .set_order_status(&p.farmer.user, p.order.order_id, OrderState::Cancelled.id())
        .await
        .unwrap();
    assert_eq!(cancelled.outcome, StatusOutcome::Updated);
    assert!(cancelled.restocked);
    assert_eq!(p.app.stock_of(p.product_id).await, 10);

    let twice = orders
        .set_order_status(&p.admin.user, p.order.order_id, OrderState::Cancelled.id())
        .await
        .unwrap();
    assert_eq!(twice.outcome, StatusOutcome::Unchanged);
    assert!(!twice.restocked);
    assert_eq!(p.app.stock_of(p.product_id).await, 10);

    let err = orders
        .set_order_status(&p.admin.user, p.order.order_id, OrderState::Delivered.id())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn cancelling_a_shipped_order_restocks() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    orders
        .set_order_status(&p.farmer.user, p.order.order_id, OrderState::Shipped.id())
        .await
        .unwrap();
    let cancelled = orders
        .set_order_status(&p.farmer.user, p.order.order_id, OrderState::Cancelled.id())
        .await
        .unwrap();
    assert!(cancelled.restocked);
    assert_eq!(p.app.stock_of(p.product_id).await, 10);
}

#[rstest]
#[case(OrderState::Shipped, OrderState::Confirmed)]
#[case(OrderState::Confirmed, OrderState::Pending)]
#[case(OrderState::Delivered, OrderState::Shipped)]
#[case(OrderState::Delivered, OrderState::Cancelled)]
#[tokio::test]
async fn backward_moves_are_rejected(#[case] reached: OrderState, #[case] requested: OrderState) {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    orders
        .set_order_status(&p.admin.user, p.order.order_id, reached.id())
        .await
        .unwrap();
    let err = orders
        .set_order_status(&p.admin.user, p.order.order_id, requested.id())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    let current = orders.get_order(&p.admin.user, p.order.order_id).await.unwrap();
    assert_eq!(current.status, reached.name());
}

#[tokio::test]
async fn who_may_change_status() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    let err = orders
        .set_order_status(&p.buyer.user, p.order.order_id, OrderState::Cancelled.id())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AuthorizationError(_));

    // A farmer with no products in the order.
    let stranger = p.app.farmer().await;
    let err = orders
        .set_order_status(&stranger.user, p.order.order_id, OrderState::Confirmed.id())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AuthorizationError(_));

    let err = orders
        .set_order_status(&p.admin.user, p.order.order_id, 9)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));

    let err = orders
        .set_order_status(&p.admin.user, p.order.order_id + 100, OrderState::Confirmed.id())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // Nothing above touched the order.
    let current = orders.get_order(&p.admin.user, p.order.order_id).await.unwrap();
    assert_eq!(current.status, "Pending");
}

#[tokio::test]
async fn order_visibility() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    let other_buyer = p.app.buyer().await;
    let err = orders
        .get_order(&other_buyer.user, p.order.order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let stranger = p.app.farmer().await;
    let err = orders
        .get_order(&stranger.user, p.order.order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let seen = orders.get_order(&p.farmer.user, p.order.order_id).await.unwrap();
    assert_eq!(seen.items.len(), 1);
    assert_eq!(seen.buyer.map(|b| b.id), Some(p.buyer.user.user_id));
}

#[tokio::test]
async fn status_endpoint() {
    let p = placed_order().await;
    let uri = format!("/api/v1/orders/{}/status", p.order.order_id);

    let forbidden = p
        .app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "status_id": OrderState::Cancelled.id() })),
            Some(&p.buyer.token),
        )
        .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let unknown = p
        .app
        .request(Method::PUT, &uri, Some(json!({ "status_id": 9 })), Some(&p.admin.token))
        .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(unknown).await["details"], "invalid_status");

    let delivered = p
        .app
        .request(Method::PUT, &uri, Some(json!({ "status_id": 4 })), Some(&p.farmer.token))
        .await;
    assert_eq!(delivered.status(), StatusCode::OK);

    let again = p
        .app
        .request(Method::PUT, &uri, Some(json!({ "status_id": 4 })), Some(&p.farmer.token))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    let body = response_json(again).await;
    assert_eq!(body["data"]["outcome"], "already_delivered");
    assert_eq!(body["message"], "Order has already been delivered");

    let backwards = p
        .app
        .request(Method::PUT, &uri, Some(json!({ "status_id": 5 })), Some(&p.admin.token))
        .await;
    assert_eq!(backwards.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn filtering_by_status() {
    let p = placed_order().await;
    let orders = &p.app.state.services.orders;

    let response = p
        .app
        .request(Method::GET, "/api/v1/orders?status_id=1", None, Some(&p.buyer.token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["total"], 1);

    orders
        .set_order_status(&p.admin.user, p.order.order_id, OrderState::Confirmed.id())
        .await
        .unwrap();

    let response = p
        .app
        .request(Method::GET, "/api/v1/orders?status_id=1", None, Some(&p.buyer.token))
        .await;
    assert_eq!(response_json(response).await["data"]["total"], 0);

    let response = p
        .app
        .request(Method::GET, "/api/v1/orders?status_id=42", None, Some(&p.buyer.token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
