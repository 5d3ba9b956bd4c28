mod common;

use axum::http::{Method, StatusCode};
use common::{json_decimal, response_json, TestApp};
use resto_incentives::entities::promotion::PromotionType;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn apply_promo_over_http_returns_outcome() {
    let app = TestApp::new().await;
    app.seed_promotion("TENOFF", PromotionType::Percent, dec!(10), |_| {})
        .await;
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(5000)).await;
    let uri = format!("/api/v1/orders/{}/promo", order.id);

    let response = app
        .request(
            Method::POST,
            &uri,
            Some(json!({ "code": "tenoff" })),
            Some(user),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["ok"], true);
    assert!(body["reason"].is_null());
    assert_eq!(json_decimal(&body["discount"]), dec!(500.00));

    let response = app
        .request(
            Method::POST,
            &uri,
            Some(json!({ "code": "NOPE" })),
            Some(user),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["reason"], "PROMO_NOT_FOUND");

    let response = app.request(Method::DELETE, &uri, None, Some(user), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(json_decimal(&body["total"]), dec!(5000.00));
}

#[tokio::test]
async fn anonymous_callers_cannot_apply_promos() {
    let app = TestApp::new().await;
    let order = app.place_simple_order(Uuid::new_v4(), dec!(1000)).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/promo", order.id),
            Some(json!({ "code": "ANY" })),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/promo", order.id),
            Some(json!({ "code": "" })),
            Some(Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_delivery_then_loyalty_and_vouchers() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let soda = app.seed_menu_item("Soda", dec!(300)).await;
    let order = app.place_order(Some(user), &[(soda, 8, dec!(300))]).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/staff/orders/{}/deliver", order.id),
            None,
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["order"]["status"], "delivered");
    assert_eq!(body["loyalty"]["vouchers"].as_array().map(Vec::len), Some(1));

    let response = app
        .request(Method::GET, "/api/v1/vouchers", None, Some(user), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let vouchers = response_json(response).await;
    assert_eq!(vouchers.as_array().map(Vec::len), Some(1));
    let voucher_id = vouchers[0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(Method::GET, "/api/v1/loyalty", None, Some(user), None)
        .await;
    let status = response_json(response).await;
    assert_eq!(status["stamps"], 0);
    assert_eq!(status["target"], 8);

    let next = app.place_simple_order(user, dec!(900)).await;
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/vouchers/{}/redeem", next.id, voucher_id),
            None,
            Some(user),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(json_decimal(&body["discount"]), dec!(900.00));

    // Delivered orders cannot go back.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/staff/orders/{}/cancel", order.id),
            None,
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn referral_endpoints_round_trip() {
    let app = TestApp::new().await;
    let referrer = Uuid::new_v4();
    let newcomer = Uuid::new_v4();

    let response = app
        .request(Method::GET, "/api/v1/referrals/code", None, Some(referrer), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = response_json(response).await["code"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/referrals/apply",
            Some(json!({ "code": code })),
            Some(referrer),
            None,
        )
        .await;
    assert_eq!(response_json(response).await["reason"], "SELF_REFERRAL");

    let response = app
        .request(
            Method::POST,
            "/api/v1/referrals/apply",
            Some(json!({ "code": code })),
            Some(newcomer),
            None,
        )
        .await;
    assert_eq!(response_json(response).await["ok"], true);

    let order = app.place_simple_order(newcomer, dec!(5500)).await;
    app.request(
        Method::POST,
        &format!("/api/v1/staff/orders/{}/deliver", order.id),
        None,
        None,
        None,
    )
    .await;

    let response = app
        .request(Method::GET, "/api/v1/rewards", None, Some(referrer), None)
        .await;
    let body = response_json(response).await;
    assert_eq!(json_decimal(&body["balance"]), dec!(1000.00));
    assert_eq!(body["entries"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn cart_and_checkout_over_http() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let session = "http-session";
    let pizza = app.seed_menu_item("Pizza", dec!(2000)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "item_id": pizza, "quantity": 2 })),
            Some(user),
            Some(session),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(json_decimal(&cart["subtotal"]), dec!(4000.00));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", pizza),
            Some(json!({ "quantity": 1 })),
            Some(user),
            Some(session),
        )
        .await;
    let cart = response_json(response).await;
    assert_eq!(json_decimal(&cart["subtotal"]), dec!(2000.00));

    let response = app
        .request(Method::POST, "/api/v1/checkout", None, Some(user), Some(session))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(json_decimal(&body["order"]["order"]["total"]), dec!(2000.00));

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(user), Some(session))
        .await;
    let cart = response_json(response).await;
    assert_eq!(cart["lines"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn cart_requires_a_session() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api/v1/cart", None, None, None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_can_create_promotions() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/staff/promotions",
            Some(json!({
                "code": "lunch15",
                "name": "Lunch deal",
                "promo_type": "PERCENT",
                "value": "15",
                "max_discount_amount": null,
                "min_order_amount": "1000",
                "segment": "ALL",
                "start_at": null,
                "end_at": null,
                "usage_limit_total": null,
                "usage_limit_per_user": 2
            })),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["code"], "LUNCH15");

    let duplicate = app
        .request(
            Method::POST,
            "/api/v1/staff/promotions",
            Some(json!({
                "code": "LUNCH15",
                "name": "Lunch deal again",
                "promo_type": "FIXED_AMOUNT",
                "value": "100",
                "max_discount_amount": null,
                "min_order_amount": null,
                "segment": "ALL",
                "start_at": null,
                "end_at": null,
                "usage_limit_total": null,
                "usage_limit_per_user": null
            })),
            None,
            None,
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn staff_can_pause_a_promotion() {
    let app = TestApp::new().await;
    let promotion = app
        .seed_promotion("PAUSEME", PromotionType::FixedAmount, dec!(100), |_| {})
        .await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/staff/promotions/{}/active", promotion.id),
            Some(json!({ "is_active": false })),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["is_active"], false);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/staff/promotions/{}/active", Uuid::new_v4()),
            Some(json!({ "is_active": true })),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
