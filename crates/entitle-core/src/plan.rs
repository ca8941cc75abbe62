//! Billing plans: the resolved output of one billing operation.
//!
//! A plan pairs local state mutations with external-processor actions. The
//! two sides are kept separate so the executor can issue processor calls
//! first and commit local writes only after the processor confirms — local
//! state must never claim a charge succeeded before it did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::context::ProrationBehavior;
use crate::customer::{CustomerProduct, CustomerProductStatus, Replaceable};
use crate::ids::RowId;
use crate::interval::BillingInterval;
use crate::product::FeatureOptions;

/// Partial update to a customer product row. `None` fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProductUpdate {
    /// New status.
    pub status: Option<CustomerProductStatus>,

    /// Set (`Some(Some(_))`) or clear (`Some(None)`) the cancellation mark.
    pub canceled_at: Option<Option<DateTime<Utc>>>,

    /// Replace prepaid options.
    pub options: Option<Vec<FeatureOptions>>,

    /// Replace product quantity.
    pub quantity: Option<u32>,

    /// Replace backing subscription ids.
    pub subscription_ids: Option<Vec<String>>,

    /// Replace backing schedule ids.
    pub schedule_ids: Option<Vec<String>>,
}

/// Partial update to an entitlement balance record.
///
/// Balance changes are expressed as deltas so concurrent writes are never
/// silently reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitlementUpdate {
    /// Added to (or, negative, removed from) the balance.
    pub balance_delta: f64,

    /// Apply the delta to this entity's slot instead of the top-level
    /// balance. A missing slot materializes at the reset allowance first.
    pub entity_id: Option<crate::ids::EntityId>,

    /// Advance the reset boundary.
    pub next_reset_at: Option<DateTime<Utc>>,
}

/// One local state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalOp {
    /// Insert a full customer product aggregate (entitlements and price
    /// rows embedded).
    InsertCustomerProduct(Box<CustomerProduct>),

    /// Update fields of a customer product, guarded by its revision.
    UpdateCustomerProduct {
        /// Target row.
        id: RowId,
        /// Revision the resolution was computed against.
        expected_revision: u64,
        /// Fields to change.
        update: CustomerProductUpdate,
    },

    /// Delete a customer product and its embedded rows (schedules that
    /// never activated; expired rows are kept for audit).
    DeleteCustomerProduct {
        /// Target row.
        id: RowId,
    },

    /// Insert an entitlement balance record into an existing customer
    /// product (update diffs granting a new feature).
    InsertEntitlement {
        /// Owning customer product row.
        customer_product_id: RowId,
        /// The new record.
        cus_ent: Box<crate::customer::CustomerEntitlement>,
    },

    /// Delete an entitlement balance record (update diffs dropping a
    /// feature).
    DeleteEntitlement {
        /// Owning customer product row.
        customer_product_id: RowId,
        /// Target balance record.
        cus_ent_id: RowId,
    },

    /// Update one entitlement balance record.
    UpdateEntitlement {
        /// Owning customer product row.
        customer_product_id: RowId,
        /// Target balance record.
        cus_ent_id: RowId,
        /// Change to apply.
        update: EntitlementUpdate,
    },

    /// Insert a replaceable (deferred-removal) slot.
    InsertReplaceable {
        /// Owning customer product row.
        customer_product_id: RowId,
        /// Owning balance record.
        cus_ent_id: RowId,
        /// The slot.
        replaceable: Replaceable,
    },

    /// Drop replaceable slots (at a cycle boundary).
    DeleteReplaceables {
        /// Owning customer product row.
        customer_product_id: RowId,
        /// Owning balance record.
        cus_ent_id: RowId,
        /// Slots to drop.
        ids: Vec<RowId>,
    },
}

/// A line item on a processor subscription, schedule phase, or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Human-readable description.
    pub description: String,

    /// Unit amount in cents (negative for credits).
    pub amount_cents: i64,

    /// Quantity.
    pub quantity: u64,

    /// Charge cadence; `None` for one-time lines.
    pub interval: Option<BillingInterval>,
}

/// One declarative external-processor action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessorOp {
    /// Create a subscription for the customer.
    CreateSubscription {
        /// Processor customer id.
        processor_customer_id: String,
        /// Line items.
        items: Vec<LineItem>,
        /// Trial end, if the attach starts inside a trial.
        trial_end: Option<DateTime<Utc>>,
        /// Collect by invoice instead of charging automatically.
        invoice_only: bool,
    },

    /// Replace a subscription's items.
    UpdateSubscription {
        /// Processor subscription id.
        subscription_id: String,
        /// New full item set.
        items: Vec<LineItem>,
        /// Proration behavior for the change.
        proration: ProrationBehavior,
    },

    /// Cancel a subscription.
    CancelSubscription {
        /// Processor subscription id.
        subscription_id: String,
        /// Cancel at period end instead of immediately.
        at_period_end: bool,
    },

    /// Create a subscription schedule phase that swaps items at a boundary.
    CreateSchedule {
        /// Processor customer id.
        processor_customer_id: String,
        /// When the phase starts (the current period end).
        starts_at: DateTime<Utc>,
        /// Items of the new phase.
        items: Vec<LineItem>,
    },

    /// Release (delete) a subscription schedule that will never activate.
    ReleaseSchedule {
        /// Processor schedule id.
        schedule_id: String,
    },

    /// Add one-time invoice items (proration deltas, one-off charges).
    CreateInvoiceItems {
        /// Processor customer id.
        processor_customer_id: String,
        /// The items.
        items: Vec<LineItem>,
    },

    /// Create and finalize an invoice collecting pending items now.
    FinalizeInvoice {
        /// Processor customer id.
        processor_customer_id: String,
    },
}

/// The resolved set of local and processor actions for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingPlan {
    /// Plan id; processor idempotency keys derive from it.
    pub id: String,

    /// Local mutations, applied after the processor side succeeds.
    pub local: Vec<LocalOp>,

    /// Processor actions, issued first and in order.
    pub processor: Vec<ProcessorOp>,
}

impl BillingPlan {
    /// Create an empty plan with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: format!("plan_{}", Ulid::new()),
            local: Vec::new(),
            processor: Vec::new(),
        }
    }

    /// Whether the plan does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.processor.is_empty()
    }

    /// The customer products this plan inserts.
    pub fn inserted_products(&self) -> impl Iterator<Item = &CustomerProduct> {
        self.local.iter().filter_map(|op| match op {
            LocalOp::InsertCustomerProduct(cp) => Some(cp.as_ref()),
            _ => None,
        })
    }

    /// Idempotency key for the processor op at `index`.
    #[must_use]
    pub fn idempotency_key(&self, index: usize) -> String {
        format!("{}_{index}", self.id)
    }
}
