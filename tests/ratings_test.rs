mod common;

use agrimarket_api::{errors::ServiceError, services::ratings::RatingInput};
use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{decimal, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

fn stars(rating: i32, comment: Option<&str>) -> RatingInput {
    RatingInput {
        rating,
        comment: comment.map(str::to_string),
    }
}

#[tokio::test]
async fn average_is_the_mean_of_all_ratings() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let ratings = &app.state.services.ratings;

    let pears = app
        .approved_product(&farmer, &admin, "Conference pears", dec!(2.20), 30)
        .await;
    let plums = app
        .approved_product(&farmer, &admin, "Damson plums", dec!(3.60), 30)
        .await;

    for score in [5, 4, 4] {
        let buyer = app.buyer().await;
        ratings
            .submit(&buyer.user, pears.product_id, stars(score, None))
            .await
            .unwrap();
    }
    let buyer = app.buyer().await;
    ratings
        .submit(&buyer.user, plums.product_id, stars(2, None))
        .await
        .unwrap();

    let summary = ratings.average_for(&buyer.user, pears.product_id).await.unwrap();
    assert_eq!(summary.count, 3);
    assert_eq!(summary.average, dec!(4.33));

    let all = ratings.averages(&buyer.user).await.unwrap();
    assert_eq!(all.len(), 2);
    let plum_summary = all
        .iter()
        .find(|s| s.product_id == plums.product_id)
        .expect("plums rated");
    assert_eq!(plum_summary.average, dec!(2));
    assert_eq!(plum_summary.count, 1);
}

#[tokio::test]
async fn unrated_product_reports_zero() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    let kale = app
        .approved_product(&farmer, &admin, "Curly kale", dec!(1.80), 10)
        .await;
    let summary = app
        .state
        .services
        .ratings
        .average_for(&buyer.user, kale.product_id)
        .await
        .unwrap();
    assert_eq!(summary.count, 0);
    assert_eq!(summary.average, dec!(0));
}

#[tokio::test]
async fn review_only_with_a_comment() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;
    let ratings = &app.state.services.ratings;

    let garlic = app
        .approved_product(&farmer, &admin, "Wet garlic", dec!(1.50), 25)
        .await;

    let bare = ratings
        .submit(&buyer.user, garlic.product_id, stars(3, None))
        .await
        .unwrap();
    assert!(bare.review.is_none());

    let blank = ratings
        .submit(&buyer.user, garlic.product_id, stars(4, Some("   ")))
        .await
        .unwrap();
    assert!(blank.review.is_none());

    let worded = ratings
        .submit(&buyer.user, garlic.product_id, stars(5, Some("  Mild and sweet  ")))
        .await
        .unwrap();
    let review = worded.review.expect("review stored");
    assert_eq!(review.comment, "Mild and sweet");

    assert_eq!(
        ratings
            .product_ratings(&buyer.user, garlic.product_id)
            .await
            .unwrap()
            .len(),
        3
    );
    let reviews = ratings
        .product_reviews(&buyer.user, garlic.product_id)
        .await
        .unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].buyer_name.as_deref(), Some("Bea Buyer"));
}

#[tokio::test]
async fn who_may_rate_what() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;
    let ratings = &app.state.services.ratings;

    let beets = app
        .approved_product(&farmer, &admin, "Golden beets", dec!(2.90), 8)
        .await;

    let err = ratings
        .submit(&farmer.user, beets.product_id, stars(5, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AuthorizationError(_));

    let err = ratings
        .submit(&buyer.user, beets.product_id, stars(6, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    let err = ratings
        .submit(&buyer.user, beets.product_id, stars(0, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let category = app.category(&admin, "Herbs").await;
    let pending = app
        .state
        .services
        .catalog
        .create_product(
            &farmer.user,
            TestApp::product_input("Lovage", dec!(1.00), 5, category.category_id),
        )
        .await
        .unwrap();
    let err = ratings
        .submit(&buyer.user, pending.product_id, stars(4, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    let err = ratings
        .average_for(&buyer.user, pending.product_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn rating_endpoints() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let farmer = app.farmer().await;
    let buyer = app.buyer().await;

    let chilli = app
        .approved_product(&farmer, &admin, "Scotch bonnets", dec!(0.40), 100)
        .await;
    let base = format!("/api/v1/products/{}", chilli.product_id);

    let submitted = app
        .request(
            Method::POST,
            &format!("{}/ratings", base),
            Some(json!({ "rating": 5, "comment": "Properly hot" })),
            Some(&buyer.token),
        )
        .await;
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let body = response_json(submitted).await;
    assert_eq!(body["data"]["rating"]["rating"], 5);
    assert_eq!(body["data"]["review"]["comment"], "Properly hot");

    let by_farmer = app
        .request(
            Method::POST,
            &format!("{}/ratings", base),
            Some(json!({ "rating": 5 })),
            Some(&farmer.token),
        )
        .await;
    assert_eq!(by_farmer.status(), StatusCode::FORBIDDEN);

    let average = response_json(
        app.request(
            Method::GET,
            &format!("{}/ratings/average", base),
            None,
            Some(&farmer.token),
        )
        .await,
    )
    .await;
    assert_eq!(decimal(&average["data"]["average"]), dec!(5));
    assert_eq!(average["data"]["count"], 1);

    let reviews = response_json(
        app.request(
            Method::GET,
            &format!("{}/reviews", base),
            None,
            Some(&buyer.token),
        )
        .await,
    )
    .await;
    assert_eq!(reviews["data"].as_array().map(Vec::len), Some(1));

    let all = response_json(
        app.request(Method::GET, "/api/v1/ratings/averages", None, Some(&admin.token))
            .await,
    )
    .await;
    assert_eq!(all["data"][0]["product_id"], chilli.product_id);
}
