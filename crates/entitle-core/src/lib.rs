//! Core types and the billing-plan resolution engine for entitle.
//!
//! This crate holds everything pure: the data model, the balance resolver,
//! the classification layer, billing context and plan value objects, the
//! plan resolver, and the cache-consistency comparison logic. No I/O
//! happens here — the store, processor client, and service crates wire
//! these functions to the outside world.
//!
//! # Flow
//!
//! A request becomes a [`context::BillingContext`] (assembled by the
//! service), which [`resolve::resolve_attach`] or [`resolve::resolve_cancel`]
//! turns into a [`plan::BillingPlan`]: local mutations paired with
//! declarative processor actions. Resolution is deterministic and
//! all-or-nothing; a partial plan is never produced.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod classify;
pub mod context;
pub mod customer;
pub mod error;
pub mod ids;
pub mod interval;
pub mod plan;
pub mod product;
pub mod resolve;
pub mod verify;

pub use balance::{
    collect_for_deduction, entitlement_balance, feature_balance, master_balance,
    sort_for_deduction, starting_balance, unlimited_and_usage_allowed, DeductionRef,
    ResolvedBalance,
};
pub use classify::{existing_in_group, find_for_subscription, ExistingProducts, Pred, Query};
pub use context::{
    AttachConfig, BillingContext, ProcessorCustomerSnapshot, ProcessorSnapshot,
    ProrationBehavior, ProrationPolicy, SubscriptionItemSnapshot, SubscriptionSnapshot,
};
pub use customer::{
    ApiVersion, AppEnv, Customer, CustomerEntitlement, CustomerPrice, CustomerProduct,
    CustomerProductStatus, Entity, EntityBalance, ProcessorAccount, ProcessorKind, Replaceable,
};
pub use error::{BillingError, Result};
pub use ids::{CustomerId, EntityId, FeatureId, IdError, OrgId, ProductId, RowId, RowKind};
pub use interval::{BillingInterval, ResetInterval};
pub use plan::{
    BillingPlan, CustomerProductUpdate, EntitlementUpdate, LineItem, LocalOp, ProcessorOp,
};
pub use product::{
    AllowanceType, BillingKind, Entitlement, Feature, FeatureOptions, FeatureType, FreeTrial,
    Price, PriceConfig, Product, Rollover, UsageTier,
};
pub use resolve::{
    resolve_attach, resolve_cancel, resolve_deduction, resolve_resets,
    resolve_scheduled_activation, resolve_timing, validate_customer_products, AttachTiming,
    InvariantViolation,
};
pub use verify::{
    compare_projections, detect_balance_races, CacheFinding, CustomerProjection, FeatureSnapshot,
    RaceFinding, RACE_GRANT_THRESHOLD,
};
