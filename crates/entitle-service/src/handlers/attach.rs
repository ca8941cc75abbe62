//! Attach, update, and cancel handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use entitle_core::{
    resolve_attach, resolve_cancel, CustomerId, CustomerProjection, EntityId, ProductId, Query,
};
use entitle_store::Store;

use crate::builder::{build_attach_context, build_cancel_context, AttachRequest};
use crate::error::ApiError;
use crate::executor::execute_plan;
use crate::state::AppState;
use crate::verifier::spawn_consistency_check;

/// One product touched by an attach.
#[derive(Debug, Serialize)]
pub struct AttachedProduct {
    /// Product id.
    pub product_id: String,
    /// Resulting status.
    pub status: String,
}

/// Attach response.
#[derive(Debug, Serialize)]
pub struct AttachResponse {
    /// The customer.
    pub customer_id: String,
    /// Rows the operation created (empty for in-place updates).
    pub attached: Vec<AttachedProduct>,
    /// Number of processor actions issued.
    pub processor_actions: usize,
}

/// Attach a product (or update an attached one) for a customer.
pub async fn attach(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AttachRequest>,
) -> Result<Json<AttachResponse>, ApiError> {
    let customer_id: CustomerId = body
        .customer_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;

    // Operations on one customer are serialized; see crate::locks.
    let _guard = state.locks.acquire(&customer_id).await;

    let ctx = build_attach_context(&state, &body).await?;
    let previous = CustomerProjection::from_customer(&ctx.customer, ctx.now);

    let plan = resolve_attach(&ctx)?;

    tracing::debug!(
        customer = %customer_id,
        products = ?ctx.products.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        local_ops = plan.local.len(),
        processor_ops = plan.processor.len(),
        "Attach resolved"
    );

    execute_plan(&state, &ctx.customer, &plan).await?;

    let attached = plan
        .inserted_products()
        .map(|cp| AttachedProduct {
            product_id: cp.product.id.to_string(),
            status: format!("{:?}", cp.status).to_lowercase(),
        })
        .collect();
    let processor_actions = plan.processor.len();

    spawn_consistency_check((*state).clone(), customer_id.clone(), Some(previous));

    Ok(Json(AttachResponse {
        customer_id: customer_id.to_string(),
        attached,
        processor_actions,
    }))
}

/// Cancel request.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// The customer.
    pub customer_id: String,
    /// The attached product to cancel.
    pub product_id: String,
    /// Sub-entity scope of the attachment.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Cancel now instead of at period end.
    #[serde(default)]
    pub cancel_immediately: bool,
}

/// Cancel response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// The customer.
    pub customer_id: String,
    /// The cancelled product.
    pub product_id: String,
    /// Whether the cancellation takes effect immediately.
    pub immediate: bool,
}

/// Cancel an attached product, immediately or at period end.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let customer_id: CustomerId = body
        .customer_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let product_id: ProductId = body
        .product_id
        .parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))?;
    let entity_id = body
        .entity_id
        .as_deref()
        .map(str::parse::<EntityId>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let _guard = state.locks.acquire(&customer_id).await;

    let ctx = build_cancel_context(&state, &customer_id).await?;
    let previous = CustomerProjection::from_customer(&ctx.customer, ctx.now);

    let target = ctx
        .customer
        .products
        .iter()
        .find(|cp| {
            cp.product.id == product_id
                && Query::new()
                    .active_status()
                    .on_entity(entity_id.as_ref())
                    .matches(cp, ctx.now)
        })
        .ok_or_else(|| {
            ApiError::NotFound(format!("no ongoing attachment of product {product_id}"))
        })?;

    // Immediate cancellation falls back to the group's default product.
    let default_product = if body.cancel_immediately {
        state
            .store
            .list_default_products(&state.org_id, state.config.env)?
            .into_iter()
            .find(|p| p.group == target.product.group && p.id != target.product.id)
    } else {
        None
    };

    let plan = resolve_cancel(
        &ctx,
        target,
        !body.cancel_immediately,
        default_product.as_ref(),
    )?;
    execute_plan(&state, &ctx.customer, &plan).await?;

    spawn_consistency_check((*state).clone(), customer_id.clone(), Some(previous));

    Ok(Json(CancelResponse {
        customer_id: customer_id.to_string(),
        product_id: product_id.to_string(),
        immediate: body.cancel_immediately,
    }))
}
