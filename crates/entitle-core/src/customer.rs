//! Customer-side records: attachments, balances, per-entity slots.
//!
//! [`CustomerProduct`] is the aggregate the engine reads and writes: one
//! customer's attachment to one product version, with its entitlement
//! balance rows and price join rows embedded. The entitlement store owns
//! canonical balances; everything else derives from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CustomerId, EntityId, FeatureId, OrgId, RowId};
use crate::product::{Entitlement, FeatureOptions, Price, Product};

/// Deployment environment scoping customers and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    /// Test-mode environment.
    Sandbox,
    /// Production environment.
    Live,
}

impl AppEnv {
    /// Environment name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Live => "live",
        }
    }
}

/// The external payment processor a customer is provisioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Stripe.
    Stripe,
}

/// A customer's account on the external payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorAccount {
    /// Which processor.
    pub kind: ProcessorKind,

    /// The processor-side customer id, once provisioned.
    pub customer_id: Option<String>,
}

/// A sub-entity of a customer (for example a seat) that consumes a
/// feature slot and can scope balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity identifier, chosen by the calling application.
    pub id: EntityId,

    /// The feature whose allowance this entity consumes.
    pub feature_id: FeatureId,

    /// Human-readable name.
    pub name: Option<String>,

    /// Soft-deletion flag; deleted entities keep their slot until the next
    /// cycle boundary.
    pub deleted: bool,
}

/// API version of the operation that created a record.
///
/// Multiple API versions of the same operation run concurrently; responses
/// are shaped per the version stamped here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion(pub u16);

impl Default for ApiVersion {
    fn default() -> Self {
        Self(1)
    }
}

/// A customer: identity plus org/environment scoping and current
/// attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer identifier, chosen by the calling application.
    pub id: CustomerId,

    /// Owning organization.
    pub org_id: OrgId,

    /// Environment.
    pub env: AppEnv,

    /// Human-readable name.
    pub name: Option<String>,

    /// Contact email.
    pub email: Option<String>,

    /// Payment-processor account, once provisioned.
    pub processor: Option<ProcessorAccount>,

    /// Sub-entities (seats and similar).
    pub entities: Vec<Entity>,

    /// Current product attachments.
    pub products: Vec<CustomerProduct>,

    /// When the customer was created.
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Live (not soft-deleted) entities.
    pub fn live_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| !e.deleted)
    }

    /// Look up an entity by id, including deleted ones.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }
}

/// Status of a customer's product attachment.
///
/// Transitions: `(none) → Scheduled | Active | Trialing → PastDue ⇄ Active
/// → Expired`, with `Scheduled → (deleted)` possible before activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerProductStatus {
    /// Takes effect at a future period boundary.
    Scheduled,
    /// Currently in effect.
    Active,
    /// Payment failed; grace period.
    PastDue,
    /// In a free trial.
    Trialing,
    /// No longer in effect. Entitlement history is retained for audit and
    /// usage carry-over.
    Expired,
    /// Processor state could not be mapped.
    Unknown,
}

impl CustomerProductStatus {
    /// Whether the attachment currently grants entitlements
    /// (Active or PastDue or Trialing).
    #[must_use]
    pub const fn is_ongoing(self) -> bool {
        matches!(self, Self::Active | Self::PastDue | Self::Trialing)
    }
}

/// Balance slot for one entity under an entity-scoped entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityBalance {
    /// Remaining consumable allowance.
    pub balance: f64,

    /// Manual adjustment applied on top of the balance.
    pub adjustment: f64,
}

/// A per-entity balance slot pending deletion at the next cycle boundary.
///
/// Created when an entity is removed mid-cycle: its allowance was already
/// paid for, so the slot is not refunded early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replaceable {
    /// Row identifier.
    pub id: RowId,

    /// The entity whose slot is being retired, when known.
    pub entity_id: Option<EntityId>,

    /// Drop the slot at the next reset instead of immediately.
    pub delete_next_cycle: bool,
}

/// Per-feature balance record under a customer product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerEntitlement {
    /// Row identifier (time-ordered).
    pub id: RowId,

    /// Owning customer product row.
    pub customer_product_id: RowId,

    /// Snapshot of the granting entitlement definition.
    pub entitlement: Entitlement,

    /// Remaining balance; `None` for unlimited and boolean grants.
    pub balance: Option<f64>,

    /// Manual adjustment applied on top of the balance.
    pub adjustment: f64,

    /// Whether usage may continue past a zero balance (overage).
    pub usage_allowed: bool,

    /// Unlimited override independent of the entitlement definition.
    pub unlimited: bool,

    /// Next reset boundary; `None` for lifetime grants.
    pub next_reset_at: Option<DateTime<Utc>>,

    /// Per-entity slots when the entitlement is entity-scoped.
    pub entities: Option<BTreeMap<EntityId, EntityBalance>>,

    /// Slots pending deferred removal.
    pub replaceables: Vec<Replaceable>,
}

impl CustomerEntitlement {
    /// The feature this record tracks.
    #[must_use]
    pub fn feature_id(&self) -> &FeatureId {
        &self.entitlement.feature.id
    }

    /// Whether this record is unlimited (definition or override).
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.unlimited || self.entitlement.is_unlimited()
    }
}

/// Join row from a customer product to one of its prices; the join used to
/// find the price that bills a given entitlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPrice {
    /// Row identifier.
    pub id: RowId,

    /// Owning customer product row.
    pub customer_product_id: RowId,

    /// Snapshot of the price definition.
    pub price: Price,
}

/// A customer's attachment to one product version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProduct {
    /// Row identifier (time-ordered).
    pub id: RowId,

    /// Owning customer.
    pub customer_id: CustomerId,

    /// Snapshot of the attached product version.
    pub product: Product,

    /// Current status.
    pub status: CustomerProductStatus,

    /// When the attachment takes (or took) effect.
    pub starts_at: DateTime<Utc>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// Cancellation request timestamp; status changes only once the
    /// processor confirms period end.
    pub canceled_at: Option<DateTime<Utc>>,

    /// Trial end, when the attachment started with a free trial.
    pub trial_ends_at: Option<DateTime<Utc>>,

    /// Prepaid feature quantities, in billing units.
    pub options: Vec<FeatureOptions>,

    /// Processor subscription ids backing this attachment.
    pub subscription_ids: Vec<String>,

    /// Processor subscription-schedule ids backing a scheduled attachment.
    pub schedule_ids: Vec<String>,

    /// Sub-entity scope, when attached to a single entity.
    pub entity_id: Option<EntityId>,

    /// Product quantity (multiplies entitlement allowances).
    pub quantity: u32,

    /// API version of the operation that created this row.
    pub api_version: ApiVersion,

    /// Optimistic-concurrency revision, bumped on every store write.
    pub revision: u64,

    /// Embedded balance records.
    pub entitlements: Vec<CustomerEntitlement>,

    /// Embedded price join rows.
    pub prices: Vec<CustomerPrice>,
}

impl CustomerProduct {
    /// Whether the attachment was cancelled (soft; still ongoing until the
    /// processor confirms period end).
    #[must_use]
    pub const fn is_canceling(&self) -> bool {
        self.canceled_at.is_some()
    }

    /// The balance record for a feature, if granted here.
    #[must_use]
    pub fn entitlement_for(&self, feature_id: &FeatureId) -> Option<&CustomerEntitlement> {
        self.entitlements.iter().find(|ce| ce.feature_id() == feature_id)
    }

    /// The prepaid quantity option for a feature, if requested.
    #[must_use]
    pub fn options_for(&self, feature_id: &FeatureId) -> Option<&FeatureOptions> {
        self.options.iter().find(|o| &o.feature_id == feature_id)
    }

    /// The price join row billing a given entitlement, if any.
    ///
    /// A price bills an entitlement when it is a usage price on the same
    /// feature and belongs to the same customer product.
    #[must_use]
    pub fn related_price(&self, cus_ent: &CustomerEntitlement) -> Option<&CustomerPrice> {
        self.prices.iter().find(|cp| {
            cp.customer_product_id == cus_ent.customer_product_id
                && cp.price.billed_feature() == Some(cus_ent.feature_id())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ongoing() {
        assert!(CustomerProductStatus::Active.is_ongoing());
        assert!(CustomerProductStatus::PastDue.is_ongoing());
        assert!(CustomerProductStatus::Trialing.is_ongoing());
        assert!(!CustomerProductStatus::Scheduled.is_ongoing());
        assert!(!CustomerProductStatus::Expired.is_ongoing());
    }

    #[test]
    fn api_version_default() {
        assert_eq!(ApiVersion::default(), ApiVersion(1));
    }
}
