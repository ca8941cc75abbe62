//! Error types for entitle.

use crate::ids::{CustomerId, EntityId, FeatureId, IdError, ProductId, RowId};

/// Result type for entitle operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur while building a billing context or resolving a
/// billing plan.
///
/// Variants fall into the closed taxonomy callers pattern-match on:
/// not-found errors are terminal with no retry, conflict errors are terminal
/// for the current request and resolved by the caller, and invalid-request
/// errors indicate malformed input. Degraded-computation paths never surface
/// here — they fall back and log instead.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Customer does not exist.
    #[error("customer not found: {customer_id}")]
    CustomerNotFound {
        /// The customer that was looked up.
        customer_id: CustomerId,
    },

    /// Product (or the requested version of it) does not exist.
    #[error("product not found: {product_id} (version {version:?})")]
    ProductNotFound {
        /// The product that was looked up.
        product_id: ProductId,
        /// The requested version, if any.
        version: Option<u32>,
    },

    /// Feature referenced by options or items does not exist.
    #[error("feature not found: {feature_id}")]
    FeatureNotFound {
        /// The feature that was looked up.
        feature_id: FeatureId,
    },

    /// Entity referenced by the request does not exist on the customer.
    #[error("entity not found: {entity_id}")]
    EntityNotFound {
        /// The entity that was looked up.
        entity_id: EntityId,
    },

    /// A prepaid quantity was requested for a feature with no prepaid price.
    #[error("no prepaid price for feature: {feature_id}")]
    NoPrepaidPrice {
        /// The feature the quantity was requested for.
        feature_id: FeatureId,
    },

    /// The customer already holds a main product in this group; the
    /// uniqueness invariant would be violated.
    #[error("duplicate main product in group {group}: {product_id}")]
    DuplicateMainProduct {
        /// The product group.
        group: String,
        /// The product already attached.
        product_id: ProductId,
    },

    /// The customer is already attached through a different payment
    /// processor than the one the request implies.
    #[error("customer {customer_id} is on a different payment processor")]
    ProcessorMismatch {
        /// The customer in conflict.
        customer_id: CustomerId,
    },

    /// A concurrent update touched the same customer product first.
    #[error("customer product {row_id} was modified concurrently (expected revision {expected})")]
    VersionConflict {
        /// The row that was concurrently modified.
        row_id: RowId,
        /// The revision this operation was resolved against.
        expected: u64,
    },

    /// The requested product is already attached in the same shape.
    #[error("product {product_id} is already attached")]
    AlreadyAttached {
        /// The product in question.
        product_id: ProductId,
    },

    /// The request is structurally invalid (mutually exclusive parameters,
    /// duplicate ids, multiple free trials, two main products of one group).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl BillingError {
    /// Whether this error is a not-found error (terminal, no retry).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CustomerNotFound { .. }
                | Self::ProductNotFound { .. }
                | Self::FeatureNotFound { .. }
                | Self::EntityNotFound { .. }
                | Self::NoPrepaidPrice { .. }
        )
    }

    /// Whether this error is a business conflict (caller must resolve and
    /// resubmit).
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateMainProduct { .. }
                | Self::ProcessorMismatch { .. }
                | Self::VersionConflict { .. }
                | Self::AlreadyAttached { .. }
        )
    }
}
