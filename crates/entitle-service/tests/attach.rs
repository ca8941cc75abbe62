//! Attach and cancel integration tests.

mod common;

use common::{basic_product, TestHarness};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn create_customer_attaches_default_free_plan() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;

    let customer = harness.get_customer("cus-1").await;
    assert_eq!(customer["products"][0]["product_id"], "free");
    assert_eq!(customer["products"][0]["status"], "active");
    assert_eq!(customer["features"]["messages"]["balance"], 10.0);
}

#[tokio::test]
async fn free_to_pro_attach_expires_free_and_grants_balance() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;

    let response = harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "cus-1", "product_id": "pro" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["attached"][0]["product_id"], "pro");
    assert_eq!(body["attached"][0]["status"], "active");
    assert!(body["processor_actions"].as_u64().unwrap() >= 1);

    let customer = harness.get_customer("cus-1").await;
    let statuses: Vec<(String, String)> = customer["products"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            (
                p["product_id"].as_str().unwrap().to_string(),
                p["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();

    assert!(statuses.contains(&("free".into(), "expired".into())));
    assert!(statuses.contains(&("pro".into(), "active".into())));
    // Expired rows no longer contribute balance.
    assert_eq!(customer["features"]["messages"]["balance"], 100.0);
}

#[tokio::test]
async fn attach_unknown_product_mutates_nothing() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;

    harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "cus-1", "product_id": "mystery" }))
        .await
        .assert_status_not_found();

    // Context building failed, so no rows appeared and no balance moved.
    let customer = harness.get_customer("cus-1").await;
    assert_eq!(customer["products"].as_array().unwrap().len(), 1);
    assert_eq!(customer["products"][0]["product_id"], "free");
}

#[tokio::test]
async fn attach_for_unknown_customer_is_not_found() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();

    harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "ghost", "product_id": "pro" }))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn reattaching_the_same_product_conflicts() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;
    harness.attach("cus-1", "pro").await;

    harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "cus-1", "product_id": "pro" }))
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn downgrade_schedules_instead_of_switching() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.seed_product(&basic_product());
    harness.create_customer("cus-1").await;
    harness.attach("cus-1", "pro").await;

    let response = harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "cus-1", "product_id": "basic" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["attached"][0]["status"], "scheduled");

    let customer = harness.get_customer("cus-1").await;
    let rows = customer["products"].as_array().unwrap();
    let pro = rows.iter().find(|p| p["product_id"] == "pro").unwrap();
    let basic = rows.iter().find(|p| p["product_id"] == "basic").unwrap();

    // Pro keeps the paid period: soft-cancelled, still active.
    assert_eq!(pro["status"], "active");
    assert_eq!(pro["canceled"], true);
    assert_eq!(basic["status"], "scheduled");

    // Scheduled rows grant nothing yet.
    assert_eq!(customer["features"]["messages"]["balance"], 100.0);
}

#[tokio::test]
async fn cancel_at_period_end_keeps_product_active() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;
    harness.attach("cus-1", "pro").await;

    let response = harness
        .server
        .post("/v1/cancel")
        .json(&json!({ "customer_id": "cus-1", "product_id": "pro" }))
        .await;
    response.assert_status_ok();

    let customer = harness.get_customer("cus-1").await;
    let rows = customer["products"].as_array().unwrap();
    let pro = rows.iter().find(|p| p["product_id"] == "pro").unwrap();
    assert_eq!(pro["status"], "active");
    assert_eq!(pro["canceled"], true);
}

#[tokio::test]
async fn cancel_immediately_falls_back_to_default_plan() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;
    harness.attach("cus-1", "pro").await;

    let response = harness
        .server
        .post("/v1/cancel")
        .json(&json!({
            "customer_id": "cus-1",
            "product_id": "pro",
            "cancel_immediately": true
        }))
        .await;
    response.assert_status_ok();

    let customer = harness.get_customer("cus-1").await;
    let rows = customer["products"].as_array().unwrap();
    let pro = rows.iter().find(|p| p["product_id"] == "pro").unwrap();
    assert_eq!(pro["status"], "expired");

    // The default free plan took over: one active free row again.
    let active_free = rows
        .iter()
        .any(|p| p["product_id"] == "free" && p["status"] == "active");
    assert!(active_free);
    assert_eq!(customer["features"]["messages"]["balance"], 10.0);
}

#[tokio::test]
async fn processor_failure_leaves_local_state_untouched() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;

    // The charge is declined: the subscription create fails.
    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "message": "Your card was declined.",
                "code": "card_declined"
            }
        })))
        .with_priority(1)
        .mount(&harness.stripe)
        .await;

    harness
        .server
        .post("/v1/attach")
        .json(&json!({ "customer_id": "cus-1", "product_id": "pro" }))
        .await
        .assert_status(axum::http::StatusCode::BAD_GATEWAY);

    // Local state never claimed the charge succeeded: the free plan is
    // still the only attachment.
    let customer = harness.get_customer("cus-1").await;
    let rows = customer["products"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["product_id"], "free");
    assert_eq!(rows[0]["status"], "active");
}

#[tokio::test]
async fn cancel_of_unattached_product_is_not_found() {
    let harness = TestHarness::new().await;
    harness.seed_catalog();
    harness.create_customer("cus-1").await;

    harness
        .server
        .post("/v1/cancel")
        .json(&json!({ "customer_id": "cus-1", "product_id": "pro" }))
        .await
        .assert_status_not_found();
}
