//! Request and response types for the entitle API.

use serde::{Deserialize, Serialize};

/// Attach a product to a customer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachParams {
    /// Target customer.
    pub customer_id: String,

    /// Target product.
    pub product_id: String,

    /// Product version; latest when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Sub-entity scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Prepaid quantities in raw feature units.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FeatureQuantity>,

    /// Explicit trial override in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_trial_days: Option<u32>,

    /// Carry consumed usage from the superseded product.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub carry_usage: bool,

    /// Collect by invoice instead of charging automatically.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub invoice_only: bool,
}

/// One prepaid quantity.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureQuantity {
    /// The feature.
    pub feature_id: String,

    /// Raw quantity.
    pub quantity: f64,
}

/// Response of an attach call.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachResponse {
    /// The customer.
    pub customer_id: String,

    /// Rows the operation created.
    pub attached: Vec<AttachedProduct>,

    /// Number of processor actions issued.
    pub processor_actions: usize,
}

/// One product attached by an operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachedProduct {
    /// Product id.
    pub product_id: String,

    /// Resulting status (`active`, `scheduled`, `trialing`, ...).
    pub status: String,
}

/// Response of a cancel call.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    /// The customer.
    pub customer_id: String,

    /// The cancelled product.
    pub product_id: String,

    /// Whether the cancellation took effect immediately.
    pub immediate: bool,
}

/// Response of a usage tracking call.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackResponse {
    /// The customer.
    pub customer_id: String,

    /// The feature.
    pub feature_id: String,

    /// Remaining balance after the deduction; `None` when unlimited.
    pub balance: Option<f64>,
}

/// Response of a feature check.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckResponse {
    /// Whether the customer may consume the feature.
    pub allowed: bool,

    /// Remaining balance; `None` when unlimited.
    pub balance: Option<f64>,

    /// Whether any grant is unlimited.
    pub unlimited: bool,

    /// Whether overage past a zero balance is allowed.
    pub usage_allowed: bool,
}

/// Error response body from the API.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: String,
}
