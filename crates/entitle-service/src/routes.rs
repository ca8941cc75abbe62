//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{attach, balances, customers, health};
use crate::state::AppState;

/// Maximum concurrent requests for balance check endpoints. Checks are
/// the hot read path and tolerate more parallelism than mutations.
const CHECK_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for billing mutation endpoints.
const BILLING_MAX_CONCURRENT_REQUESTS: usize = 25;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Customers
/// - `POST /v1/customers` - Create customer (provisions the processor)
/// - `GET /v1/customers/{id}` - Customer with products and balances
///
/// ## Billing (serialized per customer)
/// - `POST /v1/attach` - Attach or update a product
/// - `POST /v1/cancel` - Cancel an attachment
///
/// ## Checks and usage (hot path)
/// - `POST /v1/check` - Feature gate / balance check
/// - `POST /v1/track` - Track feature usage (deducts balances)
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let billing_routes = Router::new()
        .route("/attach", post(attach::attach))
        .route("/cancel", post(attach::cancel))
        .route("/customers", post(customers::create_customer))
        .layer(ConcurrencyLimitLayer::new(BILLING_MAX_CONCURRENT_REQUESTS));

    let check_routes = Router::new()
        .route("/check", post(balances::check))
        .route("/track", post(balances::track))
        .route("/customers/:id", get(customers::get_customer))
        .layer(ConcurrencyLimitLayer::new(CHECK_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", billing_routes.merge(check_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
