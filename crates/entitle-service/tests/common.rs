//! Common test utilities for entitle integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use entitle_core::{
    AllowanceType, AppEnv, BillingInterval, Entitlement, Feature, FeatureId, FeatureType,
    OrgId, Price, PriceConfig, Product, ProductId, ResetInterval,
};
use entitle_service::{create_router, AppState, ServiceConfig};
use entitle_store::{RocksStore, Store};

/// Stripe ids used by the default mocks.
pub const STRIPE_CUSTOMER_ID: &str = "cus_stripe_1";
pub const STRIPE_SUBSCRIPTION_ID: &str = "sub_test_1";
pub const STRIPE_SCHEDULE_ID: &str = "sched_test_1";

/// A period end far in the future (year 2100).
pub const PERIOD_END: i64 = 4_102_444_800;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// Mock Stripe API.
    pub stripe: MockServer,
    /// Direct store handle for seeding definitions.
    pub store: Arc<RocksStore>,
    /// Org the instance serves.
    pub org_id: OrgId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and a mocked
    /// Stripe API.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));
        let stripe = MockServer::start().await;
        mount_default_stripe_mocks(&stripe).await;

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            org_id: "test-org".into(),
            env: AppEnv::Sandbox,
            stripe_api_key: Some("sk_test_harness".into()),
            stripe_base_url: Some(stripe.uri()),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            reset_worker_interval_seconds: 0,
        };

        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            stripe,
            store,
            org_id: OrgId::new("test-org").unwrap(),
        }
    }

    /// Seed a product definition.
    pub fn seed_product(&self, product: &Product) {
        self.store
            .put_product(&self.org_id, AppEnv::Sandbox, product)
            .expect("seed product");
    }

    /// Seed the standard catalog: a default Free plan and a $20 Pro plan,
    /// both granting `messages`.
    pub fn seed_catalog(&self) {
        self.seed_product(&free_product());
        self.seed_product(&pro_product());
    }

    /// Create a customer through the API.
    pub async fn create_customer(&self, id: &str) {
        self.server
            .post("/v1/customers")
            .json(&json!({ "id": id, "name": "Test Customer" }))
            .await
            .assert_status_ok();
    }

    /// Attach a product through the API, asserting success.
    pub async fn attach(&self, customer_id: &str, product_id: &str) {
        self.server
            .post("/v1/attach")
            .json(&json!({ "customer_id": customer_id, "product_id": product_id }))
            .await
            .assert_status_ok();
    }

    /// Fetch a customer through the API.
    pub async fn get_customer(&self, id: &str) -> serde_json::Value {
        let response = self.server.get(&format!("/v1/customers/{id}")).await;
        response.assert_status_ok();
        response.json()
    }
}

/// Mount the Stripe responses every flow relies on.
async fn mount_default_stripe_mocks(stripe: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": STRIPE_CUSTOMER_ID
        })))
        .mount(stripe)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/customers/{STRIPE_CUSTOMER_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": STRIPE_CUSTOMER_ID,
            "invoice_settings": { "default_payment_method": "pm_1" }
        })))
        .mount(stripe)
        .await;

    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(false)))
        .mount(stripe)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/subscriptions/{STRIPE_SUBSCRIPTION_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(false)))
        .mount(stripe)
        .await;

    // Cancel-at-period-end and item updates both post to the subscription.
    Mock::given(method("POST"))
        .and(path(format!("/subscriptions/{STRIPE_SUBSCRIPTION_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(true)))
        .mount(stripe)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/subscriptions/{STRIPE_SUBSCRIPTION_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(false)))
        .mount(stripe)
        .await;

    Mock::given(method("POST"))
        .and(path("/subscription_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": STRIPE_SCHEDULE_ID,
            "status": "not_started"
        })))
        .mount(stripe)
        .await;
}

/// A subscription object as Stripe would return it.
pub fn subscription_json(cancel_at_period_end: bool) -> serde_json::Value {
    json!({
        "id": STRIPE_SUBSCRIPTION_ID,
        "status": "active",
        "customer": STRIPE_CUSTOMER_ID,
        "current_period_end": PERIOD_END,
        "cancel_at_period_end": cancel_at_period_end,
        "items": { "data": [], "has_more": false }
    })
}

/// The messages feature used by the test catalog.
pub fn messages_feature() -> Feature {
    Feature {
        id: FeatureId::new("messages").unwrap(),
        name: "Messages".into(),
        feature_type: FeatureType::Metered,
    }
}

fn messages_entitlement(allowance: f64) -> Entitlement {
    Entitlement {
        id: "ent_messages".into(),
        feature: messages_feature(),
        allowance_type: AllowanceType::Fixed,
        allowance,
        interval: ResetInterval::Month,
        carry_from_previous: false,
        entity_feature_id: None,
        usage_limit: None,
        rollover: None,
    }
}

/// The default Free plan: 10 messages, no prices.
pub fn free_product() -> Product {
    Product {
        id: ProductId::new("free").unwrap(),
        version: 1,
        name: "Free".into(),
        group: "plans".into(),
        is_add_on: false,
        is_default: true,
        entitlements: vec![messages_entitlement(10.0)],
        prices: Vec::new(),
        free_trial: None,
    }
}

/// The Pro plan: 100 messages, $20/month.
pub fn pro_product() -> Product {
    Product {
        id: ProductId::new("pro").unwrap(),
        version: 1,
        name: "Pro".into(),
        group: "plans".into(),
        is_add_on: false,
        is_default: false,
        entitlements: vec![messages_entitlement(100.0)],
        prices: vec![Price {
            id: "price_pro".into(),
            config: PriceConfig::Fixed {
                amount_cents: 2000,
                interval: BillingInterval::Month,
            },
        }],
        free_trial: None,
    }
}

/// The Basic plan: 50 messages, $10/month (for downgrade flows).
pub fn basic_product() -> Product {
    Product {
        id: ProductId::new("basic").unwrap(),
        version: 1,
        name: "Basic".into(),
        group: "plans".into(),
        is_add_on: false,
        is_default: false,
        entitlements: vec![messages_entitlement(50.0)],
        prices: vec![Price {
            id: "price_basic".into(),
            config: PriceConfig::Fixed {
                amount_cents: 1000,
                interval: BillingInterval::Month,
            },
        }],
        free_trial: None,
    }
}
