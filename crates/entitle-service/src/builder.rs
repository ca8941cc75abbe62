//! Billing context building: resolving a parsed request into one
//! immutable, fully-loaded [`BillingContext`].
//!
//! Building a context never mutates persisted state. Read-only lookups
//! (store reads, processor snapshots) fan out concurrently; the `now`
//! timestamp is pinned once so the whole operation is internally
//! time-consistent.

use chrono::Utc;
use serde::Deserialize;

use entitle_core::{
    context, AttachConfig, BillingContext, BillingError, Customer, CustomerId, EntityId,
    FeatureId, FeatureOptions, FreeTrial, ProcessorCustomerSnapshot, ProcessorSnapshot, Product,
    ProductId, ProrationPolicy,
};
use entitle_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// A requested prepaid quantity, in raw feature units.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsInput {
    /// The feature.
    pub feature_id: String,

    /// Raw quantity; rounded up to whole billing units during building.
    pub quantity: Option<f64>,
}

/// A per-customer override of one product item.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomItemInput {
    /// The feature whose entitlement is overridden.
    pub feature_id: String,

    /// New allowance per cycle.
    pub allowance: Option<f64>,
}

/// Parsed attach/update request, supplied by the request layer already
/// authenticated.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachRequest {
    /// Target customer.
    pub customer_id: String,

    /// Single target product.
    #[serde(default)]
    pub product_id: Option<String>,

    /// Multiple target products (mutually exclusive with `product_id`).
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,

    /// Product version; latest when absent. Only valid with a single
    /// product.
    #[serde(default)]
    pub version: Option<u32>,

    /// Sub-entity scope.
    #[serde(default)]
    pub entity_id: Option<String>,

    /// Prepaid quantities.
    #[serde(default)]
    pub options: Vec<OptionsInput>,

    /// Per-customer item overrides; implies a custom attach.
    #[serde(default)]
    pub items: Vec<CustomItemInput>,

    /// Explicit trial override in days.
    #[serde(default)]
    pub free_trial_days: Option<u32>,

    /// Carry consumed usage from the superseded product.
    #[serde(default)]
    pub carry_usage: bool,

    /// Suppress the product's free trial.
    #[serde(default)]
    pub disable_free_trial: bool,

    /// Collect by invoice instead of charging automatically.
    #[serde(default)]
    pub invoice_only: bool,

    /// Proration policy for update diffs.
    #[serde(default)]
    pub proration: Option<ProrationPolicy>,

    /// API version of the caller.
    #[serde(default)]
    pub api_version: Option<u16>,
}

/// Build the billing context for an attach/update request.
///
/// # Errors
///
/// Fails with not-found errors for missing customers, products, features,
/// or entities, and with a bad request for structurally invalid product
/// selections. No state is mutated on any path.
pub async fn build_attach_context(
    state: &AppState,
    request: &AttachRequest,
) -> Result<BillingContext, ApiError> {
    let customer_id: CustomerId = parse_id(&request.customer_id)?;
    let entity_id = request
        .entity_id
        .as_deref()
        .map(parse_id::<EntityId>)
        .transpose()?;

    let customer = load_customer(state, &customer_id)?;

    if let Some(entity_id) = &entity_id {
        if customer.entity(entity_id).is_none() {
            return Err(BillingError::EntityNotFound {
                entity_id: entity_id.clone(),
            }
            .into());
        }
    }

    let mut products = load_products(state, request)?;
    let is_custom = !request.items.is_empty();
    if is_custom {
        apply_custom_items(&mut products, &request.items)?;
    }
    context::validate_products(&products).map_err(ApiError::from)?;

    let requested_options: Vec<FeatureOptions> = request
        .options
        .iter()
        .map(|o| {
            Ok(FeatureOptions {
                feature_id: parse_id::<FeatureId>(&o.feature_id)?,
                quantity: o.quantity,
            })
        })
        .collect::<Result<_, ApiError>>()?;
    let options = context::quantize_options(&requested_options, &products).map_err(ApiError::from)?;

    let explicit_trial = request.free_trial_days.map(|duration_days| FreeTrial { duration_days });
    let free_trial = context::resolve_trial(&products, explicit_trial, request.disable_free_trial);

    let processor = snapshot_processor(state, &customer).await?;

    Ok(BillingContext {
        customer,
        products,
        options,
        free_trial,
        entity_id,
        processor,
        config: AttachConfig {
            carry_usage: request.carry_usage,
            disable_free_trial: request.disable_free_trial,
            invoice_only: request.invoice_only,
            is_custom,
            proration: request.proration.unwrap_or_default(),
        },
        api_version: request
            .api_version
            .map_or_else(entitle_core::ApiVersion::default, entitle_core::ApiVersion),
        now: Utc::now(),
    })
}

/// Build the slimmer context a cancellation needs (no target products).
///
/// # Errors
///
/// Fails if the customer does not exist.
pub async fn build_cancel_context(
    state: &AppState,
    customer_id: &CustomerId,
) -> Result<BillingContext, ApiError> {
    let customer = load_customer(state, customer_id)?;
    let processor = snapshot_processor(state, &customer).await?;

    Ok(BillingContext {
        customer,
        products: Vec::new(),
        options: Vec::new(),
        free_trial: None,
        entity_id: None,
        processor,
        config: AttachConfig::default(),
        api_version: entitle_core::ApiVersion::default(),
        now: Utc::now(),
    })
}

fn parse_id<T: std::str::FromStr<Err = entitle_core::IdError>>(raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|e: entitle_core::IdError| ApiError::BadRequest(e.to_string()))
}

fn load_customer(state: &AppState, customer_id: &CustomerId) -> Result<Customer, ApiError> {
    state
        .store
        .get_customer(&state.org_id, state.config.env, customer_id)?
        .ok_or_else(|| {
            BillingError::CustomerNotFound {
                customer_id: customer_id.clone(),
            }
            .into()
        })
}

fn load_products(state: &AppState, request: &AttachRequest) -> Result<Vec<Product>, ApiError> {
    let ids: Vec<&str> = match (&request.product_id, &request.product_ids) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "only one of product_id or product_ids can be provided".into(),
            ));
        }
        (Some(id), None) => vec![id.as_str()],
        (None, Some(ids)) => {
            if request.version.is_some() {
                return Err(ApiError::BadRequest(
                    "cannot provide version when providing product ids".into(),
                ));
            }
            ids.iter().map(String::as_str).collect()
        }
        (None, None) => {
            return Err(ApiError::BadRequest("a product id is required".into()));
        }
    };

    let mut products = Vec::with_capacity(ids.len());
    for raw in ids {
        let product_id: ProductId = parse_id(raw)?;
        let product = state
            .store
            .get_product(&state.org_id, state.config.env, &product_id, request.version)?
            .ok_or(BillingError::ProductNotFound {
                product_id,
                version: request.version,
            })?;
        products.push(product);
    }
    Ok(products)
}

fn apply_custom_items(
    products: &mut [Product],
    items: &[CustomItemInput],
) -> Result<(), ApiError> {
    for item in items {
        let feature_id: FeatureId = parse_id(&item.feature_id)?;
        let entitlement = products
            .iter_mut()
            .find_map(|p| {
                p.entitlements
                    .iter_mut()
                    .find(|e| e.feature.id == feature_id)
            })
            .ok_or(BillingError::FeatureNotFound { feature_id })?;

        if let Some(allowance) = item.allowance {
            entitlement.allowance = allowance;
        }
    }
    Ok(())
}

/// Fetch the processor-side snapshot for a customer: the processor
/// customer and every subscription backing a current attachment,
/// concurrently.
async fn snapshot_processor(
    state: &AppState,
    customer: &Customer,
) -> Result<ProcessorSnapshot, ApiError> {
    let (Some(stripe), Some(processor_customer_id)) = (
        state.stripe.as_ref(),
        customer
            .processor
            .as_ref()
            .and_then(|p| p.customer_id.as_deref()),
    ) else {
        return Ok(ProcessorSnapshot::default());
    };

    let subscription_ids: Vec<String> = customer
        .products
        .iter()
        .flat_map(|cp| cp.subscription_ids.iter().cloned())
        .collect();

    let (processor_customer, subscriptions) = tokio::join!(
        stripe.get_customer(processor_customer_id),
        futures::future::try_join_all(
            subscription_ids
                .iter()
                .map(|id| stripe.get_subscription(id))
        )
    );

    let processor_customer = processor_customer
        .map_err(|e| ApiError::Processor(format!("fetching customer snapshot: {e}")))?;
    let subscriptions = subscriptions
        .map_err(|e| ApiError::Processor(format!("fetching subscription snapshots: {e}")))?;

    Ok(ProcessorSnapshot {
        customer: processor_customer.map(|c| ProcessorCustomerSnapshot {
            has_default_payment_method: c.invoice_settings.default_payment_method.is_some(),
            id: c.id,
        }),
        subscriptions: subscriptions
            .into_iter()
            .flatten()
            .map(|s| s.to_snapshot())
            .collect(),
    })
}
