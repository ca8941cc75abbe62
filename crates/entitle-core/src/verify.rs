//! Cache consistency checks: projection comparison and the balance
//! race-condition heuristic.
//!
//! Everything here is pure; the asynchronous job wrapping it lives in the
//! service crate. Findings never block the request that triggered them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balance::{master_balance, starting_balance};
use crate::customer::{Customer, CustomerProductStatus};
use crate::ids::{CustomerId, FeatureId, ProductId};

/// Threshold of the balance race heuristic.
///
/// When a read races a grant-increasing write, the read can observe usage
/// that consumed almost exactly the newly granted amount — statistically
/// near-impossible unless a read-after-write ordering bug occurred. 99.5%
/// of the granted increase is the trip wire.
pub const RACE_GRANT_THRESHOLD: f64 = 0.995;

/// Per-feature snapshot inside a customer projection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Total consumed usage (granted minus remaining balance).
    pub usage: f64,

    /// Total granted balance, prepaid quantities included.
    pub granted: f64,
}

/// A cached (or freshly computed) read-model of a customer's billing
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProjection {
    /// The customer.
    pub customer_id: CustomerId,

    /// Plan (product) ids of ongoing subscriptions.
    pub subscription_plans: Vec<ProductId>,

    /// Plan ids of scheduled subscriptions.
    pub scheduled_plans: Vec<ProductId>,

    /// Per-feature usage and grant totals across ongoing attachments.
    pub features: BTreeMap<FeatureId, FeatureSnapshot>,

    /// When the projection was computed.
    pub captured_at: DateTime<Utc>,
}

impl CustomerProjection {
    /// Compute a fresh projection from durable state.
    #[must_use]
    pub fn from_customer(customer: &Customer, now: DateTime<Utc>) -> Self {
        let mut subscription_plans = Vec::new();
        let mut scheduled_plans = Vec::new();
        let mut features: BTreeMap<FeatureId, FeatureSnapshot> = BTreeMap::new();

        for cp in &customer.products {
            match cp.status {
                CustomerProductStatus::Scheduled => {
                    scheduled_plans.push(cp.product.id.clone());
                    continue;
                }
                status if status.is_ongoing() => subscription_plans.push(cp.product.id.clone()),
                _ => continue,
            }

            for cus_ent in &cp.entitlements {
                if cus_ent.is_unlimited() {
                    continue;
                }
                let options = cp.options_for(cus_ent.feature_id());
                let price = cp.related_price(cus_ent).map(|p| &p.price);
                let granted =
                    starting_balance(&cus_ent.entitlement, options, price, cp.quantity);
                let remaining = master_balance(cus_ent).balance;

                let snapshot = features.entry(cus_ent.feature_id().clone()).or_default();
                snapshot.granted += granted;
                snapshot.usage += granted - remaining;
            }
        }

        subscription_plans.sort();
        scheduled_plans.sort();

        Self {
            customer_id: customer.id.clone(),
            subscription_plans,
            scheduled_plans,
            features,
            captured_at: now,
        }
    }
}

/// A divergence between the cached projection and freshly computed truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheFinding {
    /// Ongoing subscription plan ids differ (missing-in-cache included).
    SubscriptionMismatch {
        /// Plan ids the cache held.
        cached: Vec<ProductId>,
        /// Plan ids durable state holds.
        fresh: Vec<ProductId>,
    },

    /// Scheduled plan ids differ.
    ScheduleMismatch {
        /// Plan ids the cache held.
        cached: Vec<ProductId>,
        /// Plan ids durable state holds.
        fresh: Vec<ProductId>,
    },
}

/// Compare a cached projection against freshly computed truth.
///
/// Subscription and scheduled-subscription identifiers are compared by
/// plan id; an id missing from the cache is a mismatch. On any finding the
/// caller invalidates the cache entry and reports.
#[must_use]
pub fn compare_projections(
    cached: &CustomerProjection,
    fresh: &CustomerProjection,
) -> Vec<CacheFinding> {
    let mut findings = Vec::new();

    let mut cached_subs = cached.subscription_plans.clone();
    let mut fresh_subs = fresh.subscription_plans.clone();
    cached_subs.sort();
    fresh_subs.sort();
    if cached_subs != fresh_subs {
        findings.push(CacheFinding::SubscriptionMismatch {
            cached: cached_subs,
            fresh: fresh_subs,
        });
    }

    let mut cached_scheduled = cached.scheduled_plans.clone();
    let mut fresh_scheduled = fresh.scheduled_plans.clone();
    cached_scheduled.sort();
    fresh_scheduled.sort();
    if cached_scheduled != fresh_scheduled {
        findings.push(CacheFinding::ScheduleMismatch {
            cached: cached_scheduled,
            fresh: fresh_scheduled,
        });
    }

    findings
}

/// A suspected balance/usage race on one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceFinding {
    /// The feature.
    pub feature_id: FeatureId,

    /// Observed usage increase.
    pub usage_increase: f64,

    /// Observed grant increase.
    pub granted_increase: f64,
}

/// Detect balance race conditions between two projections of the same
/// customer.
///
/// For every feature, a grant increase almost entirely consumed by a
/// simultaneous usage increase (`usage_increase ≥ 99.5% × granted_increase`)
/// is flagged: a balance-returning read raced a grant-increasing write.
#[must_use]
pub fn detect_balance_races(
    previous: &CustomerProjection,
    fresh: &CustomerProjection,
) -> Vec<RaceFinding> {
    let mut findings = Vec::new();

    for (feature_id, now) in &fresh.features {
        let before = previous
            .features
            .get(feature_id)
            .copied()
            .unwrap_or_default();

        let usage_increase = now.usage - before.usage;
        let granted_increase = now.granted - before.granted;

        if granted_increase > 0.0 && usage_increase >= RACE_GRANT_THRESHOLD * granted_increase {
            findings.push(RaceFinding {
                feature_id: feature_id.clone(),
                usage_increase,
                granted_increase,
            });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(features: &[(&str, f64, f64)]) -> CustomerProjection {
        CustomerProjection {
            customer_id: CustomerId::new("cus-1").unwrap(),
            subscription_plans: Vec::new(),
            scheduled_plans: Vec::new(),
            features: features
                .iter()
                .map(|(id, usage, granted)| {
                    (
                        FeatureId::new(*id).unwrap(),
                        FeatureSnapshot {
                            usage: *usage,
                            granted: *granted,
                        },
                    )
                })
                .collect(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn race_flagged_at_threshold() {
        // prevUsage=0, prevGranted=100, newUsage=99.6, newGranted=200:
        // usageIncrease=99.6 >= 0.995 * 100 => flagged.
        let previous = projection(&[("messages", 0.0, 100.0)]);
        let fresh = projection(&[("messages", 99.6, 200.0)]);

        let findings = detect_balance_races(&previous, &fresh);
        assert_eq!(findings.len(), 1);
        assert!((findings[0].usage_increase - 99.6).abs() < 1e-9);
        assert!((findings[0].granted_increase - 100.0).abs() < 1e-9);
    }

    #[test]
    fn race_not_flagged_below_threshold() {
        let previous = projection(&[("messages", 0.0, 100.0)]);
        let fresh = projection(&[("messages", 50.0, 200.0)]);
        assert!(detect_balance_races(&previous, &fresh).is_empty());
    }

    #[test]
    fn race_requires_grant_increase() {
        let previous = projection(&[("messages", 0.0, 100.0)]);
        let fresh = projection(&[("messages", 99.0, 100.0)]);
        assert!(detect_balance_races(&previous, &fresh).is_empty());
    }

    #[test]
    fn missing_feature_in_cache_defaults_to_zero() {
        let previous = projection(&[]);
        let fresh = projection(&[("messages", 100.0, 100.0)]);
        let findings = detect_balance_races(&previous, &fresh);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn projection_mismatch_by_plan_id() {
        let mut cached = projection(&[]);
        let mut fresh = projection(&[]);
        fresh
            .subscription_plans
            .push(ProductId::new("pro").unwrap());

        let findings = compare_projections(&cached, &fresh);
        assert!(matches!(
            findings[0],
            CacheFinding::SubscriptionMismatch { .. }
        ));

        // Order does not matter.
        cached.subscription_plans = vec![
            ProductId::new("a").unwrap(),
            ProductId::new("b").unwrap(),
        ];
        fresh.subscription_plans = vec![
            ProductId::new("b").unwrap(),
            ProductId::new("a").unwrap(),
        ];
        fresh.scheduled_plans.clear();
        cached.scheduled_plans.clear();
        assert!(compare_projections(&cached, &fresh).is_empty());
    }
}
