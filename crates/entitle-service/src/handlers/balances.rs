//! Feature gate and balance check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use entitle_core::{
    feature_balance, resolve_deduction, unlimited_and_usage_allowed, BillingError,
    CustomerEntitlement, CustomerId, CustomerProjection, EntityId, FeatureId, FeatureType,
};
use entitle_store::Store;

use crate::error::ApiError;
use crate::state::AppState;
use crate::verifier::spawn_consistency_check;

/// Balance check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// The customer.
    pub customer_id: String,
    /// The feature to check.
    pub feature_id: String,
    /// Sub-entity scope.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Balance required for the operation (default 1).
    #[serde(default)]
    pub required_balance: Option<f64>,
}

/// Balance check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the customer may consume the feature.
    pub allowed: bool,
    /// Remaining balance; `null` when unlimited.
    pub balance: Option<f64>,
    /// Whether any grant is unlimited.
    pub unlimited: bool,
    /// Whether overage past a zero balance is allowed.
    pub usage_allowed: bool,
}

/// Check whether a customer is entitled to consume a feature.
///
/// This is a hot read path: it never mutates state and degraded allowance
/// data falls back rather than erroring.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let customer_id: CustomerId = body
        .customer_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let feature_id: FeatureId = body
        .feature_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let entity_id = body
        .entity_id
        .as_deref()
        .map(str::parse::<EntityId>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let customer = state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .ok_or_else(|| ApiError::from(BillingError::CustomerNotFound { customer_id }))?;

    let cus_ents: Vec<&CustomerEntitlement> = customer
        .products
        .iter()
        .filter(|cp| cp.status.is_ongoing())
        .flat_map(|cp| cp.entitlements.iter())
        .collect();

    // A granted boolean feature is a plain capability switch.
    let boolean_granted = cus_ents.iter().any(|ce| {
        ce.feature_id() == &feature_id
            && ce.entitlement.feature.feature_type == FeatureType::Boolean
    });

    let (unlimited, usage_allowed) = unlimited_and_usage_allowed(&cus_ents, &feature_id);
    let balance = feature_balance(&cus_ents, &feature_id, entity_id.as_ref());

    let required = body.required_balance.unwrap_or(1.0);
    let allowed = boolean_granted
        || unlimited
        || usage_allowed
        || balance.is_some_and(|b| b >= required);

    Ok(Json(CheckResponse {
        allowed,
        balance,
        unlimited,
        usage_allowed,
    }))
}

/// Usage tracking request.
#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    /// The customer.
    pub customer_id: String,
    /// The feature consumed.
    pub feature_id: String,
    /// Amount consumed (default 1).
    #[serde(default)]
    pub value: Option<f64>,
    /// Sub-entity the usage belongs to.
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Usage tracking response.
#[derive(Debug, Serialize)]
pub struct TrackResponse {
    /// The customer.
    pub customer_id: String,
    /// The feature.
    pub feature_id: String,
    /// Remaining balance after the deduction; `null` when unlimited.
    pub balance: Option<f64>,
}

/// Track feature usage: deduct the amount across the customer's
/// entitlements in deduction order.
pub async fn track(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    let customer_id: CustomerId = body
        .customer_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let feature_id: FeatureId = body
        .feature_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let entity_id = body
        .entity_id
        .as_deref()
        .map(str::parse::<EntityId>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let value = body.value.unwrap_or(1.0);
    if value < 0.0 {
        return Err(ApiError::BadRequest("value must be non-negative".into()));
    }

    let _guard = state.locks.acquire(&customer_id).await;

    let customer = state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .ok_or_else(|| {
            ApiError::from(BillingError::CustomerNotFound {
                customer_id: customer_id.clone(),
            })
        })?;
    let previous = CustomerProjection::from_customer(&customer, chrono::Utc::now());

    let plan = resolve_deduction(&customer, &feature_id, value, entity_id.as_ref())?;
    state
        .store
        .apply_plan(&state.org_id, state.config.env, &customer_id, &plan.local)?;
    state
        .store
        .delete_projection(&state.org_id, state.config.env, &customer_id)?;

    // Report the post-deduction balance.
    let refreshed = state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .ok_or_else(|| ApiError::Internal("customer vanished during tracking".into()))?;
    let cus_ents: Vec<&CustomerEntitlement> = refreshed
        .products
        .iter()
        .filter(|cp| cp.status.is_ongoing())
        .flat_map(|cp| cp.entitlements.iter())
        .collect();
    let balance = feature_balance(&cus_ents, &feature_id, entity_id.as_ref());

    spawn_consistency_check((*state).clone(), customer_id.clone(), Some(previous));

    tracing::debug!(
        customer = %customer_id,
        feature = %feature_id,
        value,
        balance = ?balance,
        "Usage tracked"
    );

    Ok(Json(TrackResponse {
        customer_id: customer_id.to_string(),
        feature_id: feature_id.to_string(),
        balance,
    }))
}
