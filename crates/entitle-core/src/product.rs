//! Product definitions: features, entitlements, prices, free trials.
//!
//! Products are versioned plan definitions. A version is immutable once a
//! customer is attached to it; publishing a change creates a new version
//! row sharing the same [`ProductId`].

use serde::{Deserialize, Serialize};

use crate::ids::{FeatureId, ProductId};
use crate::interval::{BillingInterval, ResetInterval};

/// The kind of feature an entitlement grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// On/off capability with no meterable balance.
    Boolean,
    /// Metered feature with a consumable balance.
    Metered,
    /// Credit-system feature: a shared pool other features draw from.
    CreditSystem,
}

/// A feature that products can grant and usage prices can bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature identifier.
    pub id: FeatureId,

    /// Human-readable name.
    pub name: String,

    /// The kind of feature.
    pub feature_type: FeatureType,
}

/// Whether an entitlement's allowance is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceType {
    /// A finite allowance per reset cycle.
    Fixed,
    /// No bound; balances are reported as unbounded, never as a counter.
    Unlimited,
}

/// Rollover policy: how much unused allowance carries into the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rollover {
    /// Upper bound on the total carried balance.
    pub max: f64,

    /// How many cycles a carried grant survives.
    pub length: u32,
}

/// A grant of a feature allowance on a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Definition identifier, unique within the product version.
    pub id: String,

    /// The granted feature (denormalized).
    pub feature: Feature,

    /// Whether the allowance is bounded.
    pub allowance_type: AllowanceType,

    /// Allowance granted per reset cycle (ignored when unlimited).
    pub allowance: f64,

    /// How often the balance resets.
    pub interval: ResetInterval,

    /// Carry usage from the superseded product when attaching mid-cycle.
    pub carry_from_previous: bool,

    /// When set, balances are tracked per entity of this feature
    /// (for example per seat) instead of at the customer level.
    pub entity_feature_id: Option<FeatureId>,

    /// Hard cap on total usage including paid overage.
    pub usage_limit: Option<f64>,

    /// Rollover policy, if unused allowance carries across resets.
    pub rollover: Option<Rollover>,
}

impl Entitlement {
    /// Whether balances for this entitlement live in per-entity slots.
    #[must_use]
    pub const fn is_entity_scoped(&self) -> bool {
        self.entity_feature_id.is_some()
    }

    /// Whether the allowance is unlimited.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.allowance_type == AllowanceType::Unlimited
    }
}

/// One tier of a usage price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageTier {
    /// Upper bound of the tier in raw feature units; `None` is unbounded.
    pub up_to: Option<f64>,

    /// Price per billing unit within the tier, in cents.
    pub unit_amount_cents: i64,
}

/// Pricing configuration for one price row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceConfig {
    /// A flat amount charged per billing cycle (or once).
    Fixed {
        /// Amount in cents.
        amount_cents: i64,
        /// Charge cadence.
        interval: BillingInterval,
    },

    /// A usage-based price billing a feature.
    Usage {
        /// The feature being billed.
        feature_id: FeatureId,
        /// Units purchased/billed per increment of quantity.
        billing_units: f64,
        /// Price tiers over raw usage.
        tiers: Vec<UsageTier>,
        /// Charge cadence.
        interval: BillingInterval,
        /// Billed in advance (prepaid) rather than in arrears.
        prepaid: bool,
    },
}

/// Classified billing behavior of a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingKind {
    /// Fixed amount charged once.
    OneOff,
    /// Fixed amount charged each cycle.
    FixedCycle,
    /// Usage purchased in advance (prepaid).
    UsageInAdvance,
    /// Usage billed after the fact.
    UsageInArrears,
}

/// A billing term on a product version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Definition identifier, unique within the product version.
    pub id: String,

    /// Pricing configuration.
    pub config: PriceConfig,
}

impl Price {
    /// Classify the billing behavior of this price.
    #[must_use]
    pub fn billing_kind(&self) -> BillingKind {
        match &self.config {
            PriceConfig::Fixed { interval, .. } => {
                if interval.is_recurring() {
                    BillingKind::FixedCycle
                } else {
                    BillingKind::OneOff
                }
            }
            PriceConfig::Usage { prepaid, .. } => {
                if *prepaid {
                    BillingKind::UsageInAdvance
                } else {
                    BillingKind::UsageInArrears
                }
            }
        }
    }

    /// The price's charge cadence.
    #[must_use]
    pub fn interval(&self) -> BillingInterval {
        match &self.config {
            PriceConfig::Fixed { interval, .. } | PriceConfig::Usage { interval, .. } => *interval,
        }
    }

    /// The feature this price bills, for usage prices.
    #[must_use]
    pub fn billed_feature(&self) -> Option<&FeatureId> {
        match &self.config {
            PriceConfig::Fixed { .. } => None,
            PriceConfig::Usage { feature_id, .. } => Some(feature_id),
        }
    }

    /// Amount contributed to a cycle-total comparison: the fixed amount, or
    /// the first tier's unit amount for usage prices. One-off prices
    /// contribute nothing.
    #[must_use]
    pub fn cycle_amount_cents(&self) -> i64 {
        match &self.config {
            PriceConfig::Fixed {
                amount_cents,
                interval,
            } => {
                if interval.is_recurring() {
                    *amount_cents
                } else {
                    0
                }
            }
            PriceConfig::Usage { tiers, .. } => {
                tiers.first().map_or(0, |t| t.unit_amount_cents)
            }
        }
    }
}

/// A free trial attached to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTrial {
    /// Trial length in days.
    pub duration_days: u32,
}

/// A named, versioned plan definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier, shared across versions.
    pub id: ProductId,

    /// Version number; immutable once customers are attached.
    pub version: u32,

    /// Human-readable name.
    pub name: String,

    /// Mutually-exclusive product family. Only one main product per group
    /// may be active per customer/entity.
    pub group: String,

    /// Add-ons stack on top of a main product and never displace it.
    pub is_add_on: bool,

    /// Default products activate automatically when a paid product in the
    /// same group is cancelled.
    pub is_default: bool,

    /// Feature grants.
    pub entitlements: Vec<Entitlement>,

    /// Billing terms.
    pub prices: Vec<Price>,

    /// Optional free trial.
    pub free_trial: Option<FreeTrial>,
}

impl Product {
    /// Whether the product charges nothing.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.prices.iter().all(|p| match &p.config {
            PriceConfig::Fixed { amount_cents, .. } => *amount_cents == 0,
            PriceConfig::Usage { .. } => false,
        })
    }

    /// Whether every price is one-off (the product never recurs).
    #[must_use]
    pub fn is_one_off(&self) -> bool {
        !self.prices.is_empty() && self.prices.iter().all(|p| !p.interval().is_recurring())
    }

    /// The recurring billing interval, when any price recurs.
    ///
    /// Products mix a fixed cycle price with usage prices on the same
    /// cadence, so the first recurring price's interval is authoritative.
    #[must_use]
    pub fn recurring_interval(&self) -> Option<BillingInterval> {
        self.prices
            .iter()
            .map(Price::interval)
            .find(|i| i.is_recurring())
    }

    /// Total recurring price per cycle for upgrade/downgrade comparison.
    #[must_use]
    pub fn cycle_total_cents(&self) -> i64 {
        self.prices.iter().map(Price::cycle_amount_cents).sum()
    }

    /// The entitlement granting a feature, if any.
    #[must_use]
    pub fn entitlement_for(&self, feature_id: &FeatureId) -> Option<&Entitlement> {
        self.entitlements.iter().find(|e| &e.feature.id == feature_id)
    }

    /// The usage price billing an entitlement's feature, if any.
    #[must_use]
    pub fn price_for_feature(&self, feature_id: &FeatureId) -> Option<&Price> {
        self.prices
            .iter()
            .find(|p| p.billed_feature() == Some(feature_id))
    }

    /// The prepaid (usage-in-advance) price for a feature, if any.
    #[must_use]
    pub fn prepaid_price_for(&self, feature_id: &FeatureId) -> Option<&Price> {
        self.prices.iter().find(|p| {
            p.billing_kind() == BillingKind::UsageInAdvance && p.billed_feature() == Some(feature_id)
        })
    }
}

/// A requested prepaid quantity for one feature.
///
/// Quantities arrive in raw feature units and are normalized to whole
/// billing units (ceiling division) by the context builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOptions {
    /// The feature the quantity applies to.
    pub feature_id: FeatureId,

    /// Purchased quantity, in billing units once normalized.
    pub quantity: Option<f64>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn free_product_detection() {
        assert!(product("free", 0, 10.0).is_free());
        assert!(!product("pro", 2000, 100.0).is_free());
    }

    #[test]
    fn one_off_detection() {
        let mut p = product("pack", 500, 50.0);
        p.prices = vec![Price {
            id: "price_pack".into(),
            config: PriceConfig::Fixed {
                amount_cents: 500,
                interval: BillingInterval::OneOff,
            },
        }];
        assert!(p.is_one_off());
        assert_eq!(p.recurring_interval(), None);
        assert_eq!(p.cycle_total_cents(), 0);
    }

    #[test]
    fn cycle_total_ignores_one_off_and_uses_first_tier() {
        let mut p = product("pro", 2000, 100.0);
        p.prices.push(Price {
            id: "setup".into(),
            config: PriceConfig::Fixed {
                amount_cents: 9900,
                interval: BillingInterval::OneOff,
            },
        });
        p.prices.push(Price {
            id: "overage".into(),
            config: PriceConfig::Usage {
                feature_id: FeatureId::new("messages").unwrap(),
                billing_units: 100.0,
                tiers: vec![
                    UsageTier {
                        up_to: Some(1000.0),
                        unit_amount_cents: 300,
                    },
                    UsageTier {
                        up_to: None,
                        unit_amount_cents: 200,
                    },
                ],
                interval: BillingInterval::Month,
                prepaid: false,
            },
        });
        assert_eq!(p.cycle_total_cents(), 2000 + 300);
    }

    #[test]
    fn billing_kind_classification() {
        let fixed = monthly_price("p", 1000);
        assert_eq!(fixed.billing_kind(), BillingKind::FixedCycle);

        let prepaid = Price {
            id: "pp".into(),
            config: PriceConfig::Usage {
                feature_id: FeatureId::new("seats").unwrap(),
                billing_units: 1.0,
                tiers: vec![UsageTier {
                    up_to: None,
                    unit_amount_cents: 700,
                }],
                interval: BillingInterval::Month,
                prepaid: true,
            },
        };
        assert_eq!(prepaid.billing_kind(), BillingKind::UsageInAdvance);
    }

    #[test]
    fn prepaid_price_lookup() {
        let mut p = product("team", 4900, 0.0);
        let seats = FeatureId::new("seats").unwrap();
        p.prices.push(Price {
            id: "seat_price".into(),
            config: PriceConfig::Usage {
                feature_id: seats.clone(),
                billing_units: 1.0,
                tiers: vec![UsageTier {
                    up_to: None,
                    unit_amount_cents: 700,
                }],
                interval: BillingInterval::Month,
                prepaid: true,
            },
        });
        assert!(p.prepaid_price_for(&seats).is_some());
        assert!(p.prepaid_price_for(&FeatureId::new("other").unwrap()).is_none());
    }
}
