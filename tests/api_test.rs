//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use axum::body::Body;
use common::{harness, harness_with, test_config, NORMALIZED_PHONE};
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use voucher_backend::payments::providers::SandboxReply;

async fn call(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn pay_then_poll_until_voucher() {
    let h = harness();
    h.stock(1000, &["WIFI-API-1"]).await;

    let (status, body) = call(
        h.router(),
        post("/api/pay", json!({"phone": "0700 123 456", "amount": "1000"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let reference = body["data"]["reference"].as_str().unwrap().to_string();
    let tx = body["data"]["transactionUuid"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["amountMatch"], true);

    h.sandbox
        .script(
            &tx,
            vec![
                SandboxReply::Status("pending".to_string()),
                SandboxReply::Status("successful".to_string()),
            ],
        )
        .await;

    let (_, first) = call(
        h.router(),
        post("/api/check-payment", json!({"reference": reference})),
    )
    .await;
    assert_eq!(first["data"]["status"], "processing");
    assert!(first["data"]["voucher"].is_null());

    let (_, second) = call(
        h.router(),
        post("/api/check-payment", json!({"reference": reference})),
    )
    .await;
    assert_eq!(second["data"]["status"], "successful");
    assert_eq!(second["data"]["voucher"], "WIFI-API-1");
    assert_eq!(second["data"]["phone"], NORMALIZED_PHONE);
}

#[tokio::test]
async fn pay_rejects_bad_input_and_empty_tiers() {
    let h = harness();

    let (status, body) = call(h.router(), post("/api/pay", json!({"amount": 1000}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, body) = call(
        h.router(),
        post("/api/pay", json!({"phone": "0700123456", "amount": "ten"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_AMOUNT");

    let (status, body) = call(
        h.router(),
        post("/api/pay", json!({"phone": "0700123456", "amount": 1000})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NO_VOUCHER_AVAILABLE");
    assert_eq!(h.sandbox.status_calls(), 0);
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let h = harness();
    let (status, body) = call(
        h.router(),
        post("/api/check-payment", json!({"reference": "no-such-ref"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "PAYMENT_NOT_FOUND");
}

#[tokio::test]
async fn availability_reports_tier_stock() {
    let h = harness();
    h.stock(2000, &["WIFI-X1", "WIFI-X2"]).await;

    let (status, body) = call(
        h.router(),
        post("/api/check-voucher-availability", json!({"amount": 2000})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["available"], true);
    assert_eq!(body["data"]["count"], 2);

    let (_, empty) = call(
        h.router(),
        post("/api/check-voucher-availability", json!({"amount": "5000"})),
    )
    .await;
    assert_eq!(empty["data"]["available"], false);
}

#[tokio::test]
async fn timeout_endpoint_fails_open_payment() {
    let h = harness();
    h.stock(1000, &["WIFI-T1"]).await;
    let (_, paid) = call(
        h.router(),
        post("/api/pay", json!({"phone": "0700123456", "amount": 1000})),
    )
    .await;
    let reference = paid["data"]["reference"].as_str().unwrap().to_string();

    let (status, body) = call(
        h.router(),
        post("/api/payment-timeout", json!({"reference": reference})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["failureReason"], "client_timeout");
}

#[tokio::test]
async fn cron_tick_and_debug_snapshot() {
    let h = harness();
    h.stock(1000, &["WIFI-J1"]).await;
    let (_, paid) = call(
        h.router(),
        post("/api/pay", json!({"phone": "0700123456", "amount": 1000})),
    )
    .await;
    let tx = paid["data"]["transactionUuid"].as_str().unwrap().to_string();
    h.sandbox
        .script(&tx, vec![SandboxReply::Status("pending".to_string())])
        .await;

    let (status, tick) = call(h.router(), get("/api/cron/process-jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tick["data"]["outcome"], "requeued");
    assert_eq!(tick["data"]["attempt"], 1);

    let (status, snapshot) = call(h.router(), get("/api/debug-jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["data"]["totalJobs"], 1);
    assert_eq!(snapshot["data"]["counts"]["pending"], 1);
    assert_eq!(snapshot["data"]["jobs"][0]["retryCount"], 1);

    let (_, filtered) = call(h.router(), get("/api/debug-jobs?status=failed")).await;
    assert_eq!(filtered["data"]["jobs"].as_array().unwrap().len(), 0);

    let (status, _) = call(h.router(), get("/api/debug-jobs?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cron_secret_guards_the_tick() {
    let mut config = test_config();
    config.server.cron_secret = Some("s3cret".to_string());
    let h = harness_with(config);

    let (status, _) = call(h.router(), get("/api/cron/process-jobs")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authorized = Request::builder()
        .method("POST")
        .uri("/api/cron/process-jobs")
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(h.router(), authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "idle");
}

#[tokio::test]
async fn health_reflects_storage() {
    let h = harness();
    let (status, body) = call(h.router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");

    h.store.set_unavailable(true);
    let (status, body) = call(h.router(), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "Unhealthy");

    let (status, _) = call(h.router(), get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}
