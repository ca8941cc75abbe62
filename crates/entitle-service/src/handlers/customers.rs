//! Customer handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use entitle_core::{
    entitlement_balance, resolve_attach, ApiVersion, AttachConfig, BillingContext, BillingError,
    Customer, CustomerId, ProcessorAccount, ProcessorKind, ProcessorSnapshot,
};
use entitle_store::Store;

use crate::error::ApiError;
use crate::executor::execute_plan;
use crate::state::AppState;

/// Create-customer request.
#[derive(Debug, Deserialize)]
pub struct CreateCustomerRequest {
    /// Customer identifier chosen by the calling application.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Customer response shape shared by create and get.
#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    /// Customer id.
    pub id: String,
    /// Name.
    pub name: Option<String>,
    /// Email.
    pub email: Option<String>,
    /// Current attachments.
    pub products: Vec<CustomerProductSummary>,
    /// Per-feature balances across ongoing attachments.
    pub features: BTreeMap<String, FeatureBalanceSummary>,
}

/// One attachment in a customer response.
#[derive(Debug, Serialize)]
pub struct CustomerProductSummary {
    /// Product id.
    pub product_id: String,
    /// Status.
    pub status: String,
    /// Entity scope.
    pub entity_id: Option<String>,
    /// Cancellation mark.
    pub canceled: bool,
}

/// One feature balance in a customer response.
#[derive(Debug, Serialize)]
pub struct FeatureBalanceSummary {
    /// Remaining balance; `null` for unlimited grants.
    pub balance: Option<f64>,
    /// Whether the grant is unlimited.
    pub unlimited: bool,
    /// Next reset boundary.
    pub next_reset_at: Option<chrono::DateTime<Utc>>,
}

/// Create a customer, provision it on the payment processor, and attach
/// the org's default products.
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCustomerRequest>,
) -> Result<Json<CustomerResponse>, ApiError> {
    let customer_id: CustomerId = body
        .id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;

    let _guard = state.locks.acquire(&customer_id).await;

    if state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "customer already exists: {customer_id}"
        )));
    }

    // Provision the processor-side customer up front; context building
    // never mutates state, so this is the one place it happens.
    let processor = match state.stripe.as_ref() {
        Some(stripe) => {
            let created = stripe
                .create_customer(
                    customer_id.as_str(),
                    body.email.as_deref(),
                    body.name.as_deref(),
                )
                .await
                .map_err(|e| ApiError::Processor(format!("provisioning customer: {e}")))?;
            Some(ProcessorAccount {
                kind: ProcessorKind::Stripe,
                customer_id: Some(created.id),
            })
        }
        None => None,
    };

    let customer = Customer {
        id: customer_id.clone(),
        org_id: state.org_id.clone(),
        env: state.config.env,
        name: body.name,
        email: body.email,
        processor,
        entities: Vec::new(),
        products: Vec::new(),
        created_at: Utc::now(),
    };
    state.store.put_customer(&customer)?;

    attach_default_products(&state, &customer).await?;

    let loaded = state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .ok_or_else(|| ApiError::Internal("customer vanished after creation".into()))?;

    tracing::info!(customer = %customer_id, "Customer created");
    Ok(Json(customer_response(&loaded)))
}

/// Attach the org's free default products to a fresh customer.
async fn attach_default_products(state: &AppState, customer: &Customer) -> Result<(), ApiError> {
    // One default per group; duplicates would violate the uniqueness
    // invariant before the customer ever acted.
    let mut defaults: Vec<entitle_core::Product> = Vec::new();
    for product in state
        .store
        .list_default_products(&state.org_id, state.config.env)?
        .into_iter()
        .filter(entitle_core::Product::is_free)
    {
        if defaults.iter().any(|p| p.group == product.group) {
            tracing::warn!(
                product = %product.id,
                group = %product.group,
                "skipping extra default product in group"
            );
            continue;
        }
        defaults.push(product);
    }
    if defaults.is_empty() {
        return Ok(());
    }

    let ctx = BillingContext {
        customer: customer.clone(),
        products: defaults,
        options: Vec::new(),
        free_trial: None,
        entity_id: None,
        processor: ProcessorSnapshot::default(),
        config: AttachConfig::default(),
        api_version: ApiVersion::default(),
        now: Utc::now(),
    };

    let plan = resolve_attach(&ctx)?;
    execute_plan(state, customer, &plan).await?;
    Ok(())
}

/// Get a customer with products and feature balances.
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CustomerResponse>, ApiError> {
    let customer_id: CustomerId = id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;

    let customer = state
        .store
        .get_customer(&state.org_id, state.config.env, &customer_id)?
        .ok_or_else(|| ApiError::from(BillingError::CustomerNotFound { customer_id }))?;

    Ok(Json(customer_response(&customer)))
}

fn customer_response(customer: &Customer) -> CustomerResponse {
    let products = customer
        .products
        .iter()
        .map(|cp| CustomerProductSummary {
            product_id: cp.product.id.to_string(),
            status: format!("{:?}", cp.status).to_lowercase(),
            entity_id: cp.entity_id.as_ref().map(ToString::to_string),
            canceled: cp.is_canceling(),
        })
        .collect();

    let mut features: BTreeMap<String, FeatureBalanceSummary> = BTreeMap::new();
    for cp in customer.products.iter().filter(|cp| cp.status.is_ongoing()) {
        for cus_ent in &cp.entitlements {
            let entry = features
                .entry(cus_ent.feature_id().to_string())
                .or_insert(FeatureBalanceSummary {
                    balance: Some(0.0),
                    unlimited: false,
                    next_reset_at: None,
                });

            if cus_ent.is_unlimited() {
                entry.unlimited = true;
                entry.balance = None;
                continue;
            }
            if !entry.unlimited {
                let resolved = entitlement_balance(cus_ent, None);
                entry.balance = entry.balance.map(|b| b + resolved.balance);
            }
            entry.next_reset_at = match (entry.next_reset_at, cus_ent.next_reset_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
    }

    CustomerResponse {
        id: customer.id.to_string(),
        name: customer.name.clone(),
        email: customer.email.clone(),
        products,
        features,
    }
}
