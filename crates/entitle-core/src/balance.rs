//! Balance resolution: effective balances, allowance computation, and
//! deduction ordering.
//!
//! Everything here is pure and runs on hot read paths. Degraded inputs
//! (missing price or options data) fall back to the base allowance and log
//! rather than erroring; callers never lose a read because plan metadata
//! was incomplete.

use std::cmp::Ordering;

use crate::customer::{CustomerEntitlement, CustomerProduct, CustomerProductStatus, Entity};
use crate::ids::{EntityId, FeatureId};
use crate::product::{BillingKind, Entitlement, FeatureOptions, FeatureType, Price, PriceConfig};

/// Aggregated balance of one entitlement record across its entity slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBalance {
    /// Summed (or single) remaining balance.
    pub balance: f64,

    /// Summed (or single) adjustment.
    pub adjustment: f64,

    /// Number of slots contributing.
    pub count: usize,

    /// Soft-deleted slots that never consumed allowance; used to avoid
    /// double-refunding on carry-over.
    pub unused: usize,
}

/// Resolve the master balance of an entitlement record.
///
/// Entity-scoped records sum every per-entity slot; flat records return the
/// top-level balance with `unused` counting replaceable slots.
#[must_use]
pub fn master_balance(cus_ent: &CustomerEntitlement) -> ResolvedBalance {
    if cus_ent.entitlement.is_entity_scoped() {
        let slots = cus_ent.entities.as_ref();
        let (balance, adjustment) = slots.map_or((0.0, 0.0), |m| {
            m.values()
                .fold((0.0, 0.0), |(b, a), e| (b + e.balance, a + e.adjustment))
        });
        return ResolvedBalance {
            balance,
            adjustment,
            count: slots.map_or(0, std::collections::BTreeMap::len),
            unused: 0,
        };
    }

    ResolvedBalance {
        balance: cus_ent.balance.unwrap_or(0.0),
        adjustment: cus_ent.adjustment,
        count: 1,
        unused: cus_ent.replaceables.len(),
    }
}

/// Resolve the balance of an entitlement record for an optional entity.
///
/// With no entity requested, entity-scoped records sum all slots. With an
/// entity requested, a missing slot defaults to the reset allowance (the
/// slot simply has not been materialized yet).
#[must_use]
pub fn entitlement_balance(
    cus_ent: &CustomerEntitlement,
    entity_id: Option<&EntityId>,
) -> ResolvedBalance {
    if cus_ent.entitlement.is_entity_scoped() {
        if let Some(entity_id) = entity_id {
            let slot = cus_ent.entities.as_ref().and_then(|m| m.get(entity_id));
            return slot.map_or(
                ResolvedBalance {
                    balance: cus_ent.entitlement.allowance,
                    adjustment: 0.0,
                    count: 1,
                    unused: 0,
                },
                |e| ResolvedBalance {
                    balance: e.balance,
                    adjustment: e.adjustment,
                    count: 1,
                    unused: 0,
                },
            );
        }
        return master_balance(cus_ent);
    }

    master_balance(cus_ent)
}

/// Whether any record for the feature is unlimited, and whether any allows
/// usage past zero (overage), across a set of entitlement records.
#[must_use]
pub fn unlimited_and_usage_allowed(
    cus_ents: &[&CustomerEntitlement],
    feature_id: &FeatureId,
) -> (bool, bool) {
    let matching = || cus_ents.iter().filter(|ce| ce.feature_id() == feature_id);

    let unlimited = matching().any(|ce| ce.is_unlimited());
    let usage_allowed = matching()
        .any(|ce| ce.usage_allowed && ce.entitlement.usage_limit.is_none());

    (unlimited, usage_allowed)
}

/// Total balance of a feature across entitlement records.
///
/// Returns `None` when any record is unlimited; the unbounded marker
/// propagates so callers never display or decrement a raw counter for an
/// unlimited grant.
#[must_use]
pub fn feature_balance(
    cus_ents: &[&CustomerEntitlement],
    feature_id: &FeatureId,
    entity_id: Option<&EntityId>,
) -> Option<f64> {
    let mut total = 0.0;
    for cus_ent in cus_ents.iter().filter(|ce| ce.feature_id() == feature_id) {
        if cus_ent.is_unlimited() {
            return None;
        }
        total += entitlement_balance(cus_ent, entity_id).balance;
    }
    Some(total)
}

/// Compute the balance granted for a fresh cycle.
///
/// Base grant is `allowance × product_quantity`. A prepaid (usage-in-
/// advance) price instead grants `allowance + purchased_units ×
/// billing_units`. Missing options data on a prepaid price fails open to
/// the base allowance — this runs on hot read paths and must not error.
#[must_use]
pub fn starting_balance(
    entitlement: &Entitlement,
    options: Option<&FeatureOptions>,
    related_price: Option<&Price>,
    product_quantity: u32,
) -> f64 {
    let Some(price) = related_price else {
        return entitlement.allowance * f64::from(product_quantity.max(1));
    };

    if price.billing_kind() != BillingKind::UsageInAdvance {
        return entitlement.allowance * f64::from(product_quantity.max(1));
    }

    let PriceConfig::Usage { billing_units, .. } = &price.config else {
        return entitlement.allowance;
    };

    match options.and_then(|o| o.quantity) {
        Some(quantity) => entitlement.allowance + quantity * billing_units,
        None => {
            tracing::warn!(
                feature = %entitlement.feature.id,
                price = %price.id,
                "prepaid price has no purchased quantity, granting base allowance"
            );
            entitlement.allowance
        }
    }
}

/// Usage already consumed on the superseded attachment, to be subtracted
/// from a fresh grant.
///
/// Without this, a customer could mint free usage by upgrading mid-cycle:
/// the old product's consumed allowance would be re-granted in full on the
/// new one. Applied when the entitlement is marked `carry_from_previous`
/// or the caller requests carry explicitly.
#[must_use]
pub fn existing_usage(
    entitlement: &Entitlement,
    cus_products: &[CustomerProduct],
    entities: &[Entity],
    carry_requested: bool,
    entity_id: Option<&EntityId>,
) -> f64 {
    if entitlement.feature.feature_type == FeatureType::Boolean {
        return 0.0;
    }

    // Live entities consuming this feature count as usage themselves.
    let entity_usage = entities
        .iter()
        .filter(|e| !e.deleted && e.feature_id == entitlement.feature.id)
        .count();
    if entity_usage > 0 {
        #[allow(clippy::cast_precision_loss)]
        return entity_usage as f64;
    }

    let previous = cus_products
        .iter()
        .filter(|cp| {
            matches!(
                cp.status,
                CustomerProductStatus::Active | CustomerProductStatus::PastDue
            ) && !cp.product.is_add_on
                && cp.entity_id.as_ref() == entity_id
        })
        .flat_map(|cp| cp.entitlements.iter().map(move |ce| (cp, ce)))
        .find(|(_, ce)| ce.feature_id() == &entitlement.feature.id);

    let Some((prev_cp, prev_ce)) = previous else {
        return 0.0;
    };

    if !entitlement.carry_from_previous && !carry_requested {
        return 0.0;
    }

    if prev_ce.balance.is_none() && !prev_ce.entitlement.is_entity_scoped()
        || prev_ce.is_unlimited()
    {
        return 0.0;
    }

    let prev_options = prev_cp.options_for(&prev_ce.entitlement.feature.id);
    let prev_price = prev_cp.related_price(prev_ce).map(|cp| &cp.price);
    let prev_allowance = starting_balance(
        &prev_ce.entitlement,
        prev_options,
        prev_price,
        prev_cp.quantity,
    );

    let resolved = master_balance(prev_ce);
    #[allow(clippy::cast_precision_loss)]
    let unused = resolved.unused as f64;

    (prev_allowance - resolved.balance - unused).max(0.0)
}

/// A deduction target: one entitlement record together with its owning
/// customer product (needed for the main-vs-add-on tie-break).
#[derive(Debug, Clone, Copy)]
pub struct DeductionRef<'a> {
    /// The owning attachment.
    pub cus_product: &'a CustomerProduct,

    /// The balance record.
    pub cus_ent: &'a CustomerEntitlement,
}

/// Collect deduction targets from attachments in the given statuses,
/// sorted into deduction order.
#[must_use]
pub fn collect_for_deduction<'a>(
    cus_products: &'a [CustomerProduct],
    statuses: &[CustomerProductStatus],
    reverse: bool,
) -> Vec<DeductionRef<'a>> {
    let mut refs: Vec<DeductionRef<'a>> = cus_products
        .iter()
        .filter(|cp| statuses.contains(&cp.status))
        .flat_map(|cp| {
            cp.entitlements.iter().map(move |ce| DeductionRef {
                cus_product: cp,
                cus_ent: ce,
            })
        })
        .collect();
    sort_for_deduction(&mut refs, reverse);
    refs
}

/// Sort deduction targets into the order usage is deducted.
///
/// Ascending tie-break chain: boolean-type first, credit-system-type last,
/// unlimited before finite, records without overage before those with it,
/// records with an active reset window before those without, reset-interval
/// granularity (finest first), main product before add-on, oldest record
/// first. The reset-window and interval legs flip direction under
/// `reverse`, which refund/rollback paths use.
pub fn sort_for_deduction(refs: &mut [DeductionRef<'_>], reverse: bool) {
    refs.sort_by(|a, b| compare_for_deduction(a, b, reverse));
}

fn compare_for_deduction(a: &DeductionRef<'_>, b: &DeductionRef<'_>, reverse: bool) -> Ordering {
    let type_key = |r: &DeductionRef<'_>| {
        let ft = r.cus_ent.entitlement.feature.feature_type;
        (ft != FeatureType::Boolean, ft == FeatureType::CreditSystem)
    };
    let window_key = |r: &DeductionRef<'_>| {
        (
            r.cus_ent.next_reset_at.is_none(),
            r.cus_ent.entitlement.interval.rank(),
        )
    };

    type_key(a)
        .cmp(&type_key(b))
        .then_with(|| a.cus_ent.is_unlimited().cmp(&b.cus_ent.is_unlimited()).reverse())
        .then_with(|| a.cus_ent.usage_allowed.cmp(&b.cus_ent.usage_allowed))
        .then_with(|| {
            let ord = window_key(a).cmp(&window_key(b));
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        })
        .then_with(|| a.cus_product.product.is_add_on.cmp(&b.cus_product.product.is_add_on))
        .then_with(|| a.cus_ent.id.cmp(&b.cus_ent.id))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::customer::{ApiVersion, EntityBalance};
    use crate::ids::{CustomerId, RowId, RowKind};
    use crate::interval::ResetInterval;
    use crate::product::fixtures::{entitlement, product};
    use crate::product::{AllowanceType, UsageTier};

    fn cus_ent(ent: Entitlement, balance: f64) -> CustomerEntitlement {
        CustomerEntitlement {
            id: RowId::generate(RowKind::CustomerEntitlement),
            customer_product_id: RowId::generate(RowKind::CustomerProduct),
            balance: Some(balance),
            adjustment: 0.0,
            usage_allowed: false,
            unlimited: false,
            next_reset_at: Some(Utc::now()),
            entities: None,
            replaceables: Vec::new(),
            entitlement: ent,
        }
    }

    fn cus_product(p: crate::product::Product) -> CustomerProduct {
        let id = RowId::generate(RowKind::CustomerProduct);
        let ents = p
            .entitlements
            .iter()
            .map(|e| {
                let mut ce = cus_ent(e.clone(), e.allowance);
                ce.customer_product_id = id;
                ce
            })
            .collect();
        CustomerProduct {
            id,
            customer_id: CustomerId::new("cus-1").unwrap(),
            status: CustomerProductStatus::Active,
            starts_at: Utc::now(),
            created_at: Utc::now(),
            canceled_at: None,
            trial_ends_at: None,
            options: Vec::new(),
            subscription_ids: Vec::new(),
            schedule_ids: Vec::new(),
            entity_id: None,
            quantity: 1,
            api_version: ApiVersion::default(),
            revision: 0,
            entitlements: ents,
            prices: Vec::new(),
            product: p,
        }
    }

    #[test]
    fn master_balance_sums_entity_slots() {
        let mut ent = entitlement("messages", 100.0);
        ent.entity_feature_id = Some(crate::ids::FeatureId::new("seats").unwrap());
        let mut ce = cus_ent(ent, 0.0);
        let mut slots = BTreeMap::new();
        slots.insert(
            EntityId::new("seat-1").unwrap(),
            EntityBalance {
                balance: 40.0,
                adjustment: 1.0,
            },
        );
        slots.insert(
            EntityId::new("seat-2").unwrap(),
            EntityBalance {
                balance: 25.0,
                adjustment: -1.0,
            },
        );
        ce.entities = Some(slots);

        let resolved = master_balance(&ce);
        assert_eq!(resolved.balance, 65.0);
        assert_eq!(resolved.adjustment, 0.0);
        assert_eq!(resolved.count, 2);
    }

    #[test]
    fn missing_entity_slot_defaults_to_allowance() {
        let mut ent = entitlement("messages", 100.0);
        ent.entity_feature_id = Some(crate::ids::FeatureId::new("seats").unwrap());
        let ce = cus_ent(ent, 0.0);

        let seat = EntityId::new("seat-9").unwrap();
        let resolved = entitlement_balance(&ce, Some(&seat));
        assert_eq!(resolved.balance, 100.0);
    }

    #[test]
    fn unused_counts_replaceables() {
        let mut ce = cus_ent(entitlement("messages", 100.0), 60.0);
        ce.replaceables.push(crate::customer::Replaceable {
            id: RowId::generate(RowKind::Replaceable),
            entity_id: None,
            delete_next_cycle: true,
        });
        assert_eq!(master_balance(&ce).unused, 1);
    }

    #[test]
    fn feature_balance_propagates_unlimited() {
        let feature = FeatureId::new("messages").unwrap();
        let finite = cus_ent(entitlement("messages", 100.0), 80.0);
        let mut unlimited = cus_ent(entitlement("messages", 0.0), 0.0);
        unlimited.entitlement.allowance_type = AllowanceType::Unlimited;

        assert_eq!(
            feature_balance(&[&finite], &feature, None),
            Some(80.0)
        );
        assert_eq!(feature_balance(&[&finite, &unlimited], &feature, None), None);
    }

    #[test]
    fn starting_balance_multiplies_quantity() {
        let ent = entitlement("messages", 100.0);
        assert_eq!(starting_balance(&ent, None, None, 3), 300.0);
    }

    #[test]
    fn starting_balance_prepaid_adds_purchased_units() {
        let ent = entitlement("messages", 100.0);
        let price = Price {
            id: "pp".into(),
            config: PriceConfig::Usage {
                feature_id: ent.feature.id.clone(),
                billing_units: 50.0,
                tiers: vec![UsageTier {
                    up_to: None,
                    unit_amount_cents: 500,
                }],
                interval: crate::interval::BillingInterval::Month,
                prepaid: true,
            },
        };
        let options = FeatureOptions {
            feature_id: ent.feature.id.clone(),
            quantity: Some(4.0),
        };

        assert_eq!(
            starting_balance(&ent, Some(&options), Some(&price), 1),
            100.0 + 4.0 * 50.0
        );
        // Missing options fails open to the base allowance.
        assert_eq!(starting_balance(&ent, None, Some(&price), 1), 100.0);
    }

    #[test]
    fn existing_usage_subtracts_balance_and_unused() {
        let mut prev = cus_product(product("pro", 2000, 100.0));
        prev.entitlements[0].balance = Some(30.0);
        prev.entitlements[0].replaceables.push(crate::customer::Replaceable {
            id: RowId::generate(RowKind::Replaceable),
            entity_id: None,
            delete_next_cycle: true,
        });

        let mut next_ent = entitlement("messages", 100.0);
        next_ent.carry_from_previous = true;

        // 100 granted, 30 left, 1 unused slot => 69 consumed.
        let usage = existing_usage(&next_ent, &[prev], &[], false, None);
        assert_eq!(usage, 69.0);
    }

    #[test]
    fn existing_usage_requires_carry_flag() {
        let prev = cus_product(product("pro", 2000, 100.0));
        let next_ent = entitlement("messages", 100.0);
        assert_eq!(existing_usage(&next_ent, &[prev.clone()], &[], false, None), 0.0);
        assert!(existing_usage(&next_ent, &[prev], &[], true, None) >= 0.0);
    }

    #[test]
    fn deduction_order_is_deterministic() {
        let mut boolean_ent = entitlement("flag", 0.0);
        boolean_ent.feature.feature_type = FeatureType::Boolean;
        let mut credit_ent = entitlement("credits", 500.0);
        credit_ent.feature.feature_type = FeatureType::CreditSystem;
        let mut unlimited_ent = entitlement("messages", 0.0);
        unlimited_ent.allowance_type = AllowanceType::Unlimited;
        let mut daily_ent = entitlement("messages", 10.0);
        daily_ent.interval = ResetInterval::Day;
        let monthly_ent = entitlement("messages", 100.0);

        let mut main = cus_product(product("pro", 2000, 0.0));
        main.entitlements.clear();
        for ent in [
            credit_ent,
            monthly_ent,
            boolean_ent,
            unlimited_ent,
            daily_ent,
        ] {
            let mut ce = cus_ent(ent, 0.0);
            ce.customer_product_id = main.id;
            main.entitlements.push(ce);
        }

        let products = vec![main];
        let first = collect_for_deduction(&products, &[CustomerProductStatus::Active], false);
        let second = collect_for_deduction(&products, &[CustomerProductStatus::Active], false);

        let order: Vec<&str> = first
            .iter()
            .map(|r| r.cus_ent.entitlement.feature.id.as_str())
            .collect();
        let order2: Vec<&str> = second
            .iter()
            .map(|r| r.cus_ent.entitlement.feature.id.as_str())
            .collect();
        assert_eq!(order, order2);

        // Boolean first, credit system last, unlimited before finite,
        // day before month.
        assert_eq!(order, vec!["flag", "messages", "messages", "messages", "credits"]);
        assert!(first[1].cus_ent.is_unlimited());
        assert_eq!(first[2].cus_ent.entitlement.interval, ResetInterval::Day);
        assert_eq!(first[3].cus_ent.entitlement.interval, ResetInterval::Month);
    }

    #[test]
    fn reverse_flips_interval_tie_break() {
        let mut daily_ent = entitlement("messages", 10.0);
        daily_ent.interval = ResetInterval::Day;
        let monthly_ent = entitlement("messages", 100.0);

        let mut main = cus_product(product("pro", 2000, 0.0));
        main.entitlements.clear();
        for ent in [daily_ent, monthly_ent] {
            let mut ce = cus_ent(ent, 0.0);
            ce.customer_product_id = main.id;
            main.entitlements.push(ce);
        }
        let products = vec![main];

        let forward = collect_for_deduction(&products, &[CustomerProductStatus::Active], false);
        let reversed = collect_for_deduction(&products, &[CustomerProductStatus::Active], true);

        assert_eq!(forward[0].cus_ent.entitlement.interval, ResetInterval::Day);
        assert_eq!(reversed[0].cus_ent.entitlement.interval, ResetInterval::Month);
    }

    #[test]
    fn main_product_deducts_before_add_on() {
        let main = cus_product(product("pro", 2000, 100.0));
        let mut addon_product = product("booster", 500, 50.0);
        addon_product.is_add_on = true;
        let addon = cus_product(addon_product);

        // Add-on listed first to prove ordering is not positional.
        let products = vec![addon, main];
        let refs = collect_for_deduction(&products, &[CustomerProductStatus::Active], false);
        assert!(!refs[0].cus_product.product.is_add_on);
        assert!(refs[1].cus_product.product.is_add_on);
    }
}
