//! Integration tests for the checkout webhook.
//!
//! Everything runs in-process: no database, Redis or Stripe required.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::str::FromStr;

use apple_store_integration_tests::{
    FakePaymentProvider, TestApp, USER_ID, checkout_completed, line_item, other_event,
    signed_webhook, webhook_request,
};
use apple_store_core::{OrderStatus, PaymentMethod};
use apple_store_server::db::InMemoryOrderStore;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde_json::json;

fn two_items() -> FakePaymentProvider {
    FakePaymentProvider::new(vec![
        line_item("prod_phone", 1, 2500, Some(r#"["256gb","blue"]"#)),
        line_item("prod_case", 2, 500, None),
    ])
}

// ============================================================================
// Order creation
// ============================================================================

#[tokio::test]
async fn test_completed_checkout_creates_one_order_with_all_items() {
    let app = TestApp::new(two_items());

    let (status, body) = app
        .send(signed_webhook(checkout_completed("cs_test_a", 3500)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let orders = app.store.snapshot().await;
    assert_eq!(orders.len(), 1);
    let created = &orders[0];
    assert_eq!(created.order.user_id.as_str(), USER_ID);
    assert_eq!(
        created.order.checkout_session_id.as_ref().map(|s| s.as_str()),
        Some("cs_test_a")
    );
    assert_eq!(created.items.len(), 2);
    assert_eq!(created.order.items.len(), 2);
    assert!(
        created
            .items
            .iter()
            .all(|item| item.order_id == created.order.id)
    );
    assert_eq!(created.order.status, OrderStatus::Preparing);
    assert_eq!(created.order.payment_method, PaymentMethod::CreditCard);
}

#[tokio::test]
async fn test_total_is_sum_of_item_prices() {
    let app = TestApp::new(two_items());

    app.send(signed_webhook(checkout_completed("cs_test_total", 3500)))
        .await;

    let orders = app.store.snapshot().await;
    assert_eq!(
        orders[0].order.calculated_total.amount(),
        Decimal::from_str("35.00").unwrap()
    );
}

#[tokio::test]
async fn test_selected_options_parsed_or_empty() {
    let app = TestApp::new(two_items());

    app.send(signed_webhook(checkout_completed("cs_test_opts", 3500)))
        .await;

    let orders = app.store.snapshot().await;
    let items = &orders[0].items;
    let phone = items
        .iter()
        .find(|i| i.product_id.as_str() == "prod_phone")
        .unwrap();
    let case = items
        .iter()
        .find(|i| i.product_id.as_str() == "prod_case")
        .unwrap();
    assert_eq!(
        phone.selected_options.iter().cloned().collect::<Vec<_>>(),
        vec!["256gb".to_owned(), "blue".to_owned()]
    );
    assert!(case.selected_options.is_empty());
    assert_eq!(case.quantity, 2);
}

#[tokio::test]
async fn test_redelivery_creates_no_duplicate() {
    let app = TestApp::new(two_items());
    let body = checkout_completed("cs_test_dup", 3500);

    let (first, _) = app.send(signed_webhook(body.clone())).await;
    let (second, second_body) = app.send(signed_webhook(body)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(second_body, json!({ "received": true }));
    assert_eq!(app.store.order_count().await, 1);
    assert_eq!(app.store.item_count().await, 2);
    // The redelivery is recognised before Stripe is called again
    assert_eq!(app.provider.line_item_calls(), 1);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_missing_signature_rejected_without_writes() {
    let app = TestApp::new(two_items());

    let (status, _) = app
        .send(webhook_request(checkout_completed("cs_test_nosig", 3500), None))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
    assert_eq!(app.provider.line_item_calls(), 0);
}

#[tokio::test]
async fn test_forged_signature_rejected_without_writes() {
    let app = TestApp::new(two_items());
    let header = format!(
        "t={},v1={}",
        chrono::Utc::now().timestamp(),
        "0".repeat(64)
    );

    let (status, _) = app
        .send(webhook_request(
            checkout_completed("cs_test_forged", 3500),
            Some(&header),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_body_altered_after_signing_rejected() {
    let app = TestApp::new(two_items());
    let signed = signed_webhook(checkout_completed("cs_test_a", 3500));
    let header = signed
        .headers()
        .get("Stripe-Signature")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let (status, _) = app
        .send(webhook_request(
            checkout_completed("cs_test_b", 3500),
            Some(&header),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_failure_mid_transaction_leaves_no_partial_order() {
    let store = InMemoryOrderStore::new().with_failing_item_insert(1);
    let app = TestApp::with_store(store, two_items());

    let (status, body) = app
        .send(signed_webhook(checkout_completed("cs_test_fail", 3500)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!("Failed to process order."));
    assert_eq!(app.store.order_count().await, 0);
    assert_eq!(app.store.item_count().await, 0);
}

#[tokio::test]
async fn test_invalid_line_item_aborts_whole_order() {
    let mut broken = line_item("prod_case", 1, 500, None);
    broken.metadata.clear();
    let provider =
        FakePaymentProvider::new(vec![line_item("prod_phone", 1, 2500, None), broken]);
    let app = TestApp::new(provider);

    let (status, _) = app
        .send(signed_webhook(checkout_completed("cs_test_bad_line", 3000)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_customer_without_user_link_fails() {
    let app = TestApp::new(two_items().without_user());

    let (status, _) = app
        .send(signed_webhook(checkout_completed("cs_test_nouser", 3500)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_other_event_types_acknowledged_but_ignored() {
    let app = TestApp::new(two_items());

    let (status, body) = app
        .send(signed_webhook(other_event("payment_intent.succeeded")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": false }));
    assert_eq!(app.store.order_count().await, 0);
    assert_eq!(app.provider.line_item_calls(), 0);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new(two_items());

    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);

    app.store.set_unavailable(true);
    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = TestApp::new(two_items());

    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::http::Request::get("/health")
            .header("x-request-id", "req-123")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-123"
    );
}
