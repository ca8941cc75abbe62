//! The billing context: one operation's fully-resolved, immutable input.
//!
//! A context is assembled once per requested change (attach, update,
//! cancel) and never mutated. Its `now` timestamp is pinned at build time
//! so one operation is internally time-consistent even under a
//! processor-side test clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::customer::{ApiVersion, Customer};
use crate::error::{BillingError, Result};
use crate::ids::EntityId;
use crate::product::{FeatureOptions, FreeTrial, Product};

/// When a configuration change charges the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    /// Prorate and charge/credit immediately.
    Immediately,
    /// Apply the change at the next billing cycle.
    NextBilling,
    /// Apply without charging.
    None,
}

impl Default for ProrationBehavior {
    fn default() -> Self {
        Self::Immediately
    }
}

/// Proration policy for update diffs, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationPolicy {
    /// Behavior when the new configuration costs more.
    pub on_increase: ProrationBehavior,

    /// Behavior when the new configuration costs less.
    pub on_decrease: ProrationBehavior,
}

impl Default for ProrationPolicy {
    fn default() -> Self {
        Self {
            on_increase: ProrationBehavior::Immediately,
            on_decrease: ProrationBehavior::NextBilling,
        }
    }
}

/// Caller-controlled knobs for one attach/update operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Carry consumed usage from the superseded product even where the
    /// entitlement itself is not marked `carry_from_previous`.
    pub carry_usage: bool,

    /// Suppress the product's free trial.
    pub disable_free_trial: bool,

    /// Collect by invoice instead of charging automatically.
    pub invoice_only: bool,

    /// The target product's items were overridden per-customer.
    pub is_custom: bool,

    /// Proration policy for update diffs.
    #[serde(default)]
    pub proration: ProrationPolicy,
}

/// Snapshot of one processor-side subscription item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItemSnapshot {
    /// Processor item id.
    pub id: String,

    /// Processor price id the item bills.
    pub price_id: String,

    /// Quantity.
    pub quantity: u64,
}

/// Snapshot of one processor-side subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    /// Processor subscription id.
    pub id: String,

    /// Processor status string, untranslated.
    pub status: String,

    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,

    /// Attached subscription schedule, if any.
    pub schedule_id: Option<String>,

    /// Whether the subscription is set to cancel at period end.
    pub cancel_at_period_end: bool,

    /// Line items.
    pub items: Vec<SubscriptionItemSnapshot>,
}

/// Snapshot of the processor-side customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorCustomerSnapshot {
    /// Processor customer id.
    pub id: String,

    /// Whether a default payment method is on file.
    pub has_default_payment_method: bool,
}

/// Everything fetched from the payment processor for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    /// The processor customer, once provisioned.
    pub customer: Option<ProcessorCustomerSnapshot>,

    /// Subscriptions currently backing the customer's attachments.
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

impl ProcessorSnapshot {
    /// Snapshot of a specific subscription, if fetched.
    #[must_use]
    pub fn subscription(&self, id: &str) -> Option<&SubscriptionSnapshot> {
        self.subscriptions.iter().find(|s| s.id == id)
    }
}

/// The fully-resolved, immutable input to billing plan resolution.
#[derive(Debug, Clone)]
pub struct BillingContext {
    /// The customer, with entities and current attachments loaded.
    pub customer: Customer,

    /// Target product version(s), custom overrides already applied.
    pub products: Vec<Product>,

    /// Prepaid quantities, normalized to whole billing units.
    pub options: Vec<FeatureOptions>,

    /// Resolved trial: explicit override beats the product default.
    pub free_trial: Option<FreeTrial>,

    /// Sub-entity scope of the operation.
    pub entity_id: Option<EntityId>,

    /// Processor-side state, fetched once.
    pub processor: ProcessorSnapshot,

    /// Caller configuration.
    pub config: AttachConfig,

    /// API version of the request.
    pub api_version: ApiVersion,

    /// Timestamp pinned at context build time.
    pub now: DateTime<Utc>,
}

impl BillingContext {
    /// The prepaid option requested for a feature, if any.
    #[must_use]
    pub fn options_for(&self, feature_id: &crate::ids::FeatureId) -> Option<&FeatureOptions> {
        self.options.iter().find(|o| &o.feature_id == feature_id)
    }

    /// End of the current billing period for the subscription backing the
    /// given attachment, from the processor snapshot.
    #[must_use]
    pub fn period_end_for(&self, subscription_ids: &[String]) -> Option<DateTime<Utc>> {
        subscription_ids
            .iter()
            .filter_map(|id| self.processor.subscription(id))
            .map(|s| s.current_period_end)
            .min()
    }
}

/// Validate a multi-product attach request.
///
/// Rejects duplicate product ids, more than one product carrying a free
/// trial, and two main products from the same group.
pub fn validate_products(products: &[Product]) -> Result<()> {
    for (i, product) in products.iter().enumerate() {
        if products[..i].iter().any(|p| p.id == product.id) {
            return Err(BillingError::InvalidRequest(format!(
                "duplicate product id: {}",
                product.id
            )));
        }
    }

    let with_trial = products.iter().filter(|p| p.free_trial.is_some()).count();
    if with_trial > 1 {
        return Err(BillingError::InvalidRequest(
            "cannot attach multiple products with free trials".into(),
        ));
    }

    for product in products {
        if product.is_add_on {
            continue;
        }
        let other = products.iter().find(|p| {
            !p.is_add_on && p.group == product.group && p.id != product.id
        });
        if let Some(other) = other {
            return Err(BillingError::InvalidRequest(format!(
                "cannot attach two main products from group {}: {} and {}",
                product.group, product.id, other.id
            )));
        }
    }

    Ok(())
}

/// Normalize requested prepaid quantities from raw feature units into whole
/// billing units (ceiling division), validating that a prepaid price exists
/// for each.
pub fn quantize_options(
    requested: &[FeatureOptions],
    products: &[Product],
) -> Result<Vec<FeatureOptions>> {
    let mut normalized = Vec::with_capacity(requested.len());

    for options in requested {
        let known = products.iter().any(|p| {
            p.entitlement_for(&options.feature_id).is_some()
                || p.price_for_feature(&options.feature_id).is_some()
        });
        if !known {
            return Err(BillingError::FeatureNotFound {
                feature_id: options.feature_id.clone(),
            });
        }

        let Some(quantity) = options.quantity else {
            normalized.push(options.clone());
            continue;
        };

        let prepaid = products
            .iter()
            .find_map(|p| p.prepaid_price_for(&options.feature_id));
        let Some(prepaid) = prepaid else {
            return Err(BillingError::NoPrepaidPrice {
                feature_id: options.feature_id.clone(),
            });
        };

        let units = match &prepaid.config {
            crate::product::PriceConfig::Usage { billing_units, .. } if *billing_units > 0.0 => {
                *billing_units
            }
            _ => 1.0,
        };

        normalized.push(FeatureOptions {
            feature_id: options.feature_id.clone(),
            quantity: Some((quantity / units).ceil()),
        });
    }

    Ok(normalized)
}

/// Resolve the trial for an attach: explicit override beats the product
/// default; `disable_free_trial` suppresses both.
#[must_use]
pub fn resolve_trial(
    products: &[Product],
    explicit: Option<FreeTrial>,
    disable: bool,
) -> Option<FreeTrial> {
    if disable {
        return None;
    }
    explicit.or_else(|| products.iter().find_map(|p| p.free_trial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FeatureId;
    use crate::interval::BillingInterval;
    use crate::product::fixtures::product;
    use crate::product::{Price, PriceConfig, UsageTier};

    fn with_prepaid(mut p: Product, feature: &str, billing_units: f64) -> Product {
        p.prices.push(Price {
            id: format!("prepaid_{feature}"),
            config: PriceConfig::Usage {
                feature_id: FeatureId::new(feature).unwrap(),
                billing_units,
                tiers: vec![UsageTier {
                    up_to: None,
                    unit_amount_cents: 700,
                }],
                interval: BillingInterval::Month,
                prepaid: true,
            },
        });
        p
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let products = vec![product("pro", 2000, 100.0), product("pro", 2000, 100.0)];
        assert!(matches!(
            validate_products(&products),
            Err(BillingError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_rejects_two_mains_in_group() {
        let products = vec![product("pro", 2000, 100.0), product("starter", 1000, 50.0)];
        assert!(validate_products(&products).is_err());

        let mut addon = product("booster", 500, 10.0);
        addon.is_add_on = true;
        let products = vec![product("pro", 2000, 100.0), addon];
        assert!(validate_products(&products).is_ok());
    }

    #[test]
    fn quantize_rounds_up_to_billing_units() {
        let p = with_prepaid(product("team", 4900, 0.0), "messages", 100.0);
        let requested = vec![FeatureOptions {
            feature_id: FeatureId::new("messages").unwrap(),
            quantity: Some(250.0),
        }];

        let normalized = quantize_options(&requested, &[p]).unwrap();
        // 250 raw units at 100 per billing unit => 3 units.
        assert_eq!(normalized[0].quantity, Some(3.0));
    }

    #[test]
    fn quantize_requires_prepaid_price() {
        let p = product("pro", 2000, 100.0);
        let requested = vec![FeatureOptions {
            feature_id: FeatureId::new("messages").unwrap(),
            quantity: Some(50.0),
        }];
        assert!(matches!(
            quantize_options(&requested, &[p]),
            Err(BillingError::NoPrepaidPrice { .. })
        ));
    }

    #[test]
    fn quantize_rejects_unknown_feature() {
        let p = product("pro", 2000, 100.0);
        let requested = vec![FeatureOptions {
            feature_id: FeatureId::new("mystery").unwrap(),
            quantity: Some(1.0),
        }];
        assert!(matches!(
            quantize_options(&requested, &[p]),
            Err(BillingError::FeatureNotFound { .. })
        ));
    }

    #[test]
    fn trial_resolution_order() {
        let mut p = product("pro", 2000, 100.0);
        p.free_trial = Some(FreeTrial { duration_days: 7 });
        let explicit = FreeTrial { duration_days: 30 };

        assert_eq!(
            resolve_trial(std::slice::from_ref(&p), Some(explicit), false),
            Some(explicit)
        );
        assert_eq!(
            resolve_trial(std::slice::from_ref(&p), None, false),
            Some(FreeTrial { duration_days: 7 })
        );
        assert_eq!(resolve_trial(&[p], None, true), None);
    }
}
