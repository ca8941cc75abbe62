//! Billing plan resolution: the decision engine turning one billing
//! context into a billing plan.
//!
//! Resolution is pure and deterministic given its context, and
//! all-or-nothing: any missing relationship fails before a single op is
//! emitted, so a partial plan can never be executed.

use chrono::{DateTime, Duration, Utc};

use crate::balance::{existing_usage, starting_balance};
use crate::classify::{existing_in_group, ExistingProducts};
use crate::context::{BillingContext, ProrationBehavior};
use crate::customer::{
    Customer, CustomerEntitlement, CustomerPrice, CustomerProduct, CustomerProductStatus,
    EntityBalance,
};
use crate::error::{BillingError, Result};
use crate::ids::{EntityId, RowId, RowKind};
use crate::plan::{
    BillingPlan, CustomerProductUpdate, EntitlementUpdate, LineItem, LocalOp, ProcessorOp,
};
use crate::product::{BillingKind, Entitlement, FeatureType, PriceConfig, Product};

/// When a new attachment takes effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachTiming {
    /// Takes effect now.
    Immediate,
    /// Takes effect at the current period's end.
    Scheduled {
        /// The boundary at which the attachment activates.
        starts_at: DateTime<Utc>,
    },
}

/// Resolve when an attach of `product` takes effect.
///
/// Add-ons are always immediate. With no ongoing main product in the
/// group/entity (or when re-attaching the same product id) the attach is
/// immediate. Otherwise the cycle totals are compared, by interval rank
/// when the intervals differ: strictly more expensive activates now
/// (upgrades unlock value immediately), anything else waits for period end
/// (downgrades must not forfeit already-paid time).
#[must_use]
pub fn resolve_timing(
    ctx: &BillingContext,
    product: &Product,
    existing: &ExistingProducts<'_>,
) -> AttachTiming {
    if product.is_add_on {
        return AttachTiming::Immediate;
    }

    let Some(current) = existing.current_main else {
        return AttachTiming::Immediate;
    };

    if current.product.id == product.id {
        return AttachTiming::Immediate;
    }

    let is_upgrade = match (
        current.product.recurring_interval(),
        product.recurring_interval(),
    ) {
        (Some(cur), Some(new)) if cur != new => new.rank() > cur.rank(),
        _ => product.cycle_total_cents() > current.product.cycle_total_cents(),
    };

    if is_upgrade {
        return AttachTiming::Immediate;
    }

    let starts_at = ctx
        .period_end_for(&current.subscription_ids)
        .or_else(|| {
            current
                .product
                .recurring_interval()
                .and_then(|i| i.advance(ctx.now))
        });

    match starts_at {
        Some(starts_at) => AttachTiming::Scheduled { starts_at },
        None => {
            tracing::warn!(
                product = %product.id,
                "no period boundary for downgrade, attaching immediately"
            );
            AttachTiming::Immediate
        }
    }
}

/// Initialize a customer product aggregate for an attach.
#[must_use]
pub fn init_customer_product(
    ctx: &BillingContext,
    product: &Product,
    timing: AttachTiming,
    inherited_subscription_ids: Vec<String>,
) -> CustomerProduct {
    let cus_product_id = RowId::generate(RowKind::CustomerProduct);

    let trial_ends_at = ctx
        .free_trial
        .filter(|_| matches!(timing, AttachTiming::Immediate))
        .map(|t| ctx.now + Duration::days(i64::from(t.duration_days)));

    let (status, starts_at) = match timing {
        AttachTiming::Immediate => {
            let status = if trial_ends_at.is_some() {
                CustomerProductStatus::Trialing
            } else {
                CustomerProductStatus::Active
            };
            (status, ctx.now)
        }
        AttachTiming::Scheduled { starts_at } => (CustomerProductStatus::Scheduled, starts_at),
    };

    let entitlements = product
        .entitlements
        .iter()
        .map(|ent| init_customer_entitlement(ctx, product, ent, cus_product_id, trial_ends_at))
        .collect();

    let prices = product
        .prices
        .iter()
        .map(|price| CustomerPrice {
            id: RowId::generate(RowKind::CustomerPrice),
            customer_product_id: cus_product_id,
            price: price.clone(),
        })
        .collect();

    CustomerProduct {
        id: cus_product_id,
        customer_id: ctx.customer.id.clone(),
        product: product.clone(),
        status,
        starts_at,
        created_at: ctx.now,
        canceled_at: None,
        trial_ends_at,
        options: ctx.options.clone(),
        subscription_ids: inherited_subscription_ids,
        schedule_ids: Vec::new(),
        entity_id: ctx.entity_id.clone(),
        quantity: 1,
        api_version: ctx.api_version,
        revision: 0,
        entitlements,
        prices,
    }
}

/// Initialize one entitlement balance record for an attach.
fn init_customer_entitlement(
    ctx: &BillingContext,
    product: &Product,
    ent: &Entitlement,
    cus_product_id: RowId,
    trial_ends_at: Option<DateTime<Utc>>,
) -> CustomerEntitlement {
    let boolean = ent.feature.feature_type == FeatureType::Boolean;
    let unlimited = ent.is_unlimited();

    let options = ctx.options_for(&ent.feature.id);
    let related_price = product.price_for_feature(&ent.feature.id);

    let next_reset_at = if boolean || unlimited {
        None
    } else {
        // Trial attaches align the first reset with the trial boundary.
        trial_ends_at.or_else(|| ent.interval.advance(ctx.now))
    };

    let usage_allowed = related_price
        .map(|p| p.billing_kind() == BillingKind::UsageInArrears)
        .unwrap_or(false);

    let (balance, entities) = if boolean || unlimited {
        (None, None)
    } else if let Some(entity_feature) = &ent.entity_feature_id {
        let slots = ctx
            .customer
            .live_entities()
            .filter(|e| &e.feature_id == entity_feature)
            .map(|e| {
                (
                    e.id.clone(),
                    EntityBalance {
                        balance: ent.allowance,
                        adjustment: 0.0,
                    },
                )
            })
            .collect();
        (None, Some(slots))
    } else {
        let granted = starting_balance(ent, options, related_price, 1);
        let consumed = existing_usage(
            ent,
            &ctx.customer.products,
            &ctx.customer.entities,
            ctx.config.carry_usage,
            ctx.entity_id.as_ref(),
        );
        (Some(granted - consumed), None)
    };

    CustomerEntitlement {
        id: RowId::generate(RowKind::CustomerEntitlement),
        customer_product_id: cus_product_id,
        entitlement: ent.clone(),
        balance,
        adjustment: 0.0,
        usage_allowed,
        unlimited,
        next_reset_at,
        entities,
        replaceables: Vec::new(),
    }
}

/// Subscription line items for a product: fixed recurring prices plus
/// prepaid usage purchases. Arrears usage is billed after the fact and
/// one-off prices go through invoice items, so neither appears here.
#[must_use]
pub fn subscription_items(ctx: &BillingContext, product: &Product) -> Vec<LineItem> {
    let mut items = Vec::new();
    for price in &product.prices {
        match &price.config {
            PriceConfig::Fixed {
                amount_cents,
                interval,
            } if interval.is_recurring() => {
                items.push(LineItem {
                    description: product.name.clone(),
                    amount_cents: *amount_cents,
                    quantity: 1,
                    interval: Some(*interval),
                });
            }
            PriceConfig::Usage {
                feature_id,
                tiers,
                interval,
                prepaid: true,
                ..
            } => {
                let units = ctx
                    .options_for(feature_id)
                    .and_then(|o| o.quantity)
                    .unwrap_or(0.0);
                if units > 0.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    items.push(LineItem {
                        description: format!("{} ({feature_id})", product.name),
                        amount_cents: tiers.first().map_or(0, |t| t.unit_amount_cents),
                        quantity: units as u64,
                        interval: Some(*interval),
                    });
                }
            }
            _ => {}
        }
    }
    items
}

/// One-time line items for a one-off product.
#[must_use]
pub fn one_off_items(product: &Product) -> Vec<LineItem> {
    product
        .prices
        .iter()
        .filter_map(|price| match &price.config {
            PriceConfig::Fixed {
                amount_cents,
                interval,
            } if !interval.is_recurring() => Some(LineItem {
                description: product.name.clone(),
                amount_cents: *amount_cents,
                quantity: 1,
                interval: None,
            }),
            _ => None,
        })
        .collect()
}

/// Resolve an attach (or update-by-attach) into a billing plan.
///
/// Covers new attaches, upgrades, downgrades, one-off top-ups, and
/// same-product configuration updates, for every target product in the
/// context.
pub fn resolve_attach(ctx: &BillingContext) -> Result<BillingPlan> {
    let mut plan = BillingPlan::new();

    for product in &ctx.products {
        resolve_attach_one(ctx, product, &mut plan)?;
    }

    Ok(plan)
}

#[allow(clippy::too_many_lines)]
fn resolve_attach_one(
    ctx: &BillingContext,
    product: &Product,
    plan: &mut BillingPlan,
) -> Result<()> {
    let existing = existing_in_group(
        &ctx.customer.products,
        product,
        ctx.entity_id.as_ref(),
        ctx.now,
    );

    let processor_customer_id = ctx.processor.customer.as_ref().map(|c| c.id.clone());

    // Paid products need a processor account before any op is emitted.
    if !product.is_free() && processor_customer_id.is_none() {
        return Err(BillingError::InvalidRequest(format!(
            "cannot attach paid product {} without a payment processor account",
            product.id
        )));
    }

    // Same product already attached.
    if let Some(same) = existing.current_same {
        if product.is_one_off() {
            return resolve_one_off_top_up(ctx, product, same, plan, processor_customer_id);
        }
        if same.product.version == product.version {
            if ctx.config.is_custom {
                return resolve_same_product_update(ctx, product, same, plan, processor_customer_id);
            }
            return Err(BillingError::AlreadyAttached {
                product_id: product.id.clone(),
            });
        }
        // A new version of the held product flows through the normal
        // attach path below, superseding the old row.
    }

    // One-off products never recur and never displace the main product.
    if product.is_one_off() {
        let processor_customer_id = require_processor(processor_customer_id, product)?;
        let new_row = init_customer_product(ctx, product, AttachTiming::Immediate, Vec::new());
        plan.local.push(LocalOp::InsertCustomerProduct(Box::new(new_row)));
        plan.processor.push(ProcessorOp::CreateInvoiceItems {
            processor_customer_id: processor_customer_id.clone(),
            items: one_off_items(product),
        });
        plan.processor.push(ProcessorOp::FinalizeInvoice {
            processor_customer_id,
        });
        return Ok(());
    }

    let timing = resolve_timing(ctx, product, &existing);

    // Scheduled action: a superseded schedule is deleted before it ever
    // activates; re-scheduling the same product is a caller error.
    // Add-ons stack and never displace a schedule in their group.
    if let Some(scheduled) = existing.current_scheduled.filter(|_| !product.is_add_on) {
        if matches!(timing, AttachTiming::Scheduled { .. }) && scheduled.product.id == product.id {
            return Err(BillingError::AlreadyAttached {
                product_id: product.id.clone(),
            });
        }
        plan.local.push(LocalOp::DeleteCustomerProduct { id: scheduled.id });
        for schedule_id in &scheduled.schedule_ids {
            plan.processor.push(ProcessorOp::ReleaseSchedule {
                schedule_id: schedule_id.clone(),
            });
        }
    }

    // Ongoing action: add-ons never touch the main product.
    let ongoing = existing.current_main.filter(|_| !product.is_add_on);
    let mut inherited_subscription_ids = Vec::new();

    match (&timing, ongoing) {
        (AttachTiming::Immediate, Some(current)) => {
            plan.local.push(LocalOp::UpdateCustomerProduct {
                id: current.id,
                expected_revision: current.revision,
                update: CustomerProductUpdate {
                    status: Some(CustomerProductStatus::Expired),
                    ..CustomerProductUpdate::default()
                },
            });

            if let Some(sub_id) = current.subscription_ids.first() {
                // Upgrade in place: the backing subscription swaps to the
                // new product's items and carries over.
                plan.processor.push(ProcessorOp::UpdateSubscription {
                    subscription_id: sub_id.clone(),
                    items: subscription_items(ctx, product),
                    proration: ctx.config.proration.on_increase,
                });
                inherited_subscription_ids = current.subscription_ids.clone();
            }
        }
        (AttachTiming::Scheduled { starts_at }, Some(current)) => {
            plan.local.push(LocalOp::UpdateCustomerProduct {
                id: current.id,
                expected_revision: current.revision,
                update: CustomerProductUpdate {
                    canceled_at: Some(Some(ctx.now)),
                    ..CustomerProductUpdate::default()
                },
            });

            for sub_id in &current.subscription_ids {
                plan.processor.push(ProcessorOp::CancelSubscription {
                    subscription_id: sub_id.clone(),
                    at_period_end: true,
                });
            }

            let items = subscription_items(ctx, product);
            if !items.is_empty() && !product.is_free() {
                plan.processor.push(ProcessorOp::CreateSchedule {
                    processor_customer_id: require_processor(processor_customer_id.clone(), product)?,
                    starts_at: *starts_at,
                    items,
                });
            }
        }
        _ => {}
    }

    // New product action.
    let new_row = init_customer_product(ctx, product, timing, inherited_subscription_ids.clone());
    let needs_subscription = matches!(timing, AttachTiming::Immediate)
        && inherited_subscription_ids.is_empty()
        && !product.is_free()
        && product.recurring_interval().is_some();

    if needs_subscription {
        plan.processor.push(ProcessorOp::CreateSubscription {
            processor_customer_id: require_processor(processor_customer_id, product)?,
            items: subscription_items(ctx, product),
            trial_end: new_row.trial_ends_at,
            invoice_only: ctx.config.invoice_only,
        });
    }

    plan.local.push(LocalOp::InsertCustomerProduct(Box::new(new_row)));
    Ok(())
}

fn require_processor(id: Option<String>, product: &Product) -> Result<String> {
    id.ok_or_else(|| {
        BillingError::InvalidRequest(format!(
            "cannot bill product {} without a payment processor account",
            product.id
        ))
    })
}

/// Top up an already-held one-off product: bump prepaid quantities on the
/// existing row and invoice only the delta.
fn resolve_one_off_top_up(
    ctx: &BillingContext,
    product: &Product,
    held: &CustomerProduct,
    plan: &mut BillingPlan,
    processor_customer_id: Option<String>,
) -> Result<()> {
    let mut merged = held.options.clone();
    let mut delta_items = Vec::new();

    for new_opt in &ctx.options {
        let new_units = new_opt.quantity.unwrap_or(0.0);
        let slot = merged.iter_mut().find(|o| o.feature_id == new_opt.feature_id);
        match slot {
            Some(slot) => {
                slot.quantity = Some(slot.quantity.unwrap_or(0.0) + new_units);
            }
            None => merged.push(new_opt.clone()),
        }

        if new_units > 0.0 {
            if let Some(price) = product.prepaid_price_for(&new_opt.feature_id) {
                if let PriceConfig::Usage { tiers, billing_units, .. } = &price.config {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    delta_items.push(LineItem {
                        description: format!("{} ({})", product.name, new_opt.feature_id),
                        amount_cents: tiers.first().map_or(0, |t| t.unit_amount_cents),
                        quantity: new_units as u64,
                        interval: None,
                    });

                    // The purchased units land on the balance immediately.
                    if let Some(cus_ent) = held.entitlement_for(&new_opt.feature_id) {
                        plan.local.push(LocalOp::UpdateEntitlement {
                            customer_product_id: held.id,
                            cus_ent_id: cus_ent.id,
                            update: EntitlementUpdate {
                                balance_delta: new_units * billing_units,
                                entity_id: None,
                                next_reset_at: None,
                            },
                        });
                    }
                }
            }
        }
    }

    plan.local.push(LocalOp::UpdateCustomerProduct {
        id: held.id,
        expected_revision: held.revision,
        update: CustomerProductUpdate {
            options: Some(merged),
            ..CustomerProductUpdate::default()
        },
    });

    // Also invoice non-prepaid one-off prices again (a repeat purchase).
    let mut items = one_off_items(product);
    items.append(&mut delta_items);
    if !items.is_empty() {
        let processor_customer_id = processor_customer_id.ok_or_else(|| {
            BillingError::InvalidRequest(format!(
                "cannot invoice one-off product {} without a payment processor account",
                product.id
            ))
        })?;
        plan.processor.push(ProcessorOp::CreateInvoiceItems {
            processor_customer_id: processor_customer_id.clone(),
            items,
        });
        plan.processor.push(ProcessorOp::FinalizeInvoice {
            processor_customer_id,
        });
    }

    Ok(())
}

/// Update an active product's configuration in place by diffing old and
/// new item sets per feature.
///
/// Local deltas touch only the allowance portion, so consumed usage is
/// never silently reset; the processor side reflects only the change.
fn resolve_same_product_update(
    ctx: &BillingContext,
    product: &Product,
    current: &CustomerProduct,
    plan: &mut BillingPlan,
    processor_customer_id: Option<String>,
) -> Result<()> {
    let mut prepaid_delta_items: Vec<LineItem> = Vec::new();

    // Entitlements present in the new configuration.
    for ent in &product.entitlements {
        let new_options = ctx.options_for(&ent.feature.id);
        let new_price = product.price_for_feature(&ent.feature.id);
        let new_allowance = starting_balance(ent, new_options, new_price, current.quantity);

        match current.entitlement_for(&ent.feature.id) {
            Some(cus_ent) => {
                let old_options = current.options_for(&ent.feature.id);
                let old_price = current.related_price(cus_ent).map(|cp| &cp.price);
                let old_allowance = starting_balance(
                    &cus_ent.entitlement,
                    old_options,
                    old_price,
                    current.quantity,
                );

                let delta = new_allowance - old_allowance;
                if delta != 0.0 {
                    plan.local.push(LocalOp::UpdateEntitlement {
                        customer_product_id: current.id,
                        cus_ent_id: cus_ent.id,
                        update: EntitlementUpdate {
                            balance_delta: delta,
                            entity_id: None,
                            next_reset_at: None,
                        },
                    });
                }

                // Prepaid quantity changes invoice only the delta.
                if let Some(price) = new_price.filter(|p| p.billing_kind() == BillingKind::UsageInAdvance) {
                    let old_units = old_options.and_then(|o| o.quantity).unwrap_or(0.0);
                    let new_units = new_options.and_then(|o| o.quantity).unwrap_or(0.0);
                    let unit_delta = new_units - old_units;
                    let behavior = if unit_delta > 0.0 {
                        ctx.config.proration.on_increase
                    } else {
                        ctx.config.proration.on_decrease
                    };
                    if unit_delta != 0.0 && behavior == ProrationBehavior::Immediately {
                        if let PriceConfig::Usage { tiers, .. } = &price.config {
                            #[allow(clippy::cast_possible_truncation)]
                            prepaid_delta_items.push(LineItem {
                                description: format!("{} ({})", product.name, ent.feature.id),
                                amount_cents: tiers.first().map_or(0, |t| t.unit_amount_cents)
                                    * unit_delta as i64,
                                quantity: 1,
                                interval: None,
                            });
                        }
                    }
                }
            }
            None => {
                let cus_ent =
                    init_customer_entitlement(ctx, product, ent, current.id, current.trial_ends_at);
                plan.local.push(LocalOp::InsertEntitlement {
                    customer_product_id: current.id,
                    cus_ent: Box::new(cus_ent),
                });
            }
        }
    }

    // Entitlements dropped by the new configuration.
    for cus_ent in &current.entitlements {
        if product.entitlement_for(cus_ent.feature_id()).is_none() {
            plan.local.push(LocalOp::DeleteEntitlement {
                customer_product_id: current.id,
                cus_ent_id: cus_ent.id,
            });
        }
    }

    plan.local.push(LocalOp::UpdateCustomerProduct {
        id: current.id,
        expected_revision: current.revision,
        update: CustomerProductUpdate {
            options: Some(ctx.options.clone()),
            ..CustomerProductUpdate::default()
        },
    });

    // Fixed-price changes replace the subscription's items, prorated per
    // the caller's policy and direction of the change.
    let old_total = current.product.cycle_total_cents();
    let new_total = product.cycle_total_cents();
    if new_total != old_total {
        if let Some(sub_id) = current.subscription_ids.first() {
            let proration = if new_total > old_total {
                ctx.config.proration.on_increase
            } else {
                ctx.config.proration.on_decrease
            };
            plan.processor.push(ProcessorOp::UpdateSubscription {
                subscription_id: sub_id.clone(),
                items: subscription_items(ctx, product),
                proration,
            });
        }
    }

    if !prepaid_delta_items.is_empty() {
        let processor_customer_id = processor_customer_id.ok_or_else(|| {
            BillingError::InvalidRequest(
                "cannot invoice configuration change without a payment processor account".into(),
            )
        })?;
        plan.processor.push(ProcessorOp::CreateInvoiceItems {
            processor_customer_id,
            items: prepaid_delta_items,
        });
    }

    Ok(())
}

/// Resolve a cancellation into a billing plan.
///
/// Immediate cancellation expires the row, cancels its subscriptions now,
/// deletes any schedule in the group, and activates the group's default
/// product. At-period-end cancellation only marks `canceled_at` and asks
/// the processor to stop at the boundary; the status changes when the
/// processor confirms.
pub fn resolve_cancel(
    ctx: &BillingContext,
    target: &CustomerProduct,
    at_period_end: bool,
    default_product: Option<&Product>,
) -> Result<BillingPlan> {
    let mut plan = BillingPlan::new();

    if !target.status.is_ongoing() {
        return Err(BillingError::InvalidRequest(format!(
            "cannot cancel product {} in status {:?}",
            target.product.id, target.status
        )));
    }

    if at_period_end {
        plan.local.push(LocalOp::UpdateCustomerProduct {
            id: target.id,
            expected_revision: target.revision,
            update: CustomerProductUpdate {
                canceled_at: Some(Some(ctx.now)),
                ..CustomerProductUpdate::default()
            },
        });
        for sub_id in &target.subscription_ids {
            plan.processor.push(ProcessorOp::CancelSubscription {
                subscription_id: sub_id.clone(),
                at_period_end: true,
            });
        }
        return Ok(plan);
    }

    plan.local.push(LocalOp::UpdateCustomerProduct {
        id: target.id,
        expected_revision: target.revision,
        update: CustomerProductUpdate {
            status: Some(CustomerProductStatus::Expired),
            canceled_at: Some(Some(ctx.now)),
            ..CustomerProductUpdate::default()
        },
    });
    for sub_id in &target.subscription_ids {
        plan.processor.push(ProcessorOp::CancelSubscription {
            subscription_id: sub_id.clone(),
            at_period_end: false,
        });
    }

    // A schedule in the same group can never activate once its ongoing
    // product is gone.
    let existing = existing_in_group(
        &ctx.customer.products,
        &target.product,
        target.entity_id.as_ref(),
        ctx.now,
    );
    if let Some(scheduled) = existing.current_scheduled {
        plan.local.push(LocalOp::DeleteCustomerProduct { id: scheduled.id });
        for schedule_id in &scheduled.schedule_ids {
            plan.processor.push(ProcessorOp::ReleaseSchedule {
                schedule_id: schedule_id.clone(),
            });
        }
    }

    // Fall back to the group's default (free) product.
    if let Some(default_product) = default_product {
        if default_product.id != target.product.id {
            let row = init_customer_product(ctx, default_product, AttachTiming::Immediate, Vec::new());
            plan.local.push(LocalOp::InsertCustomerProduct(Box::new(row)));
        }
    }

    Ok(plan)
}

/// Resolve a scheduled attachment reaching its phase boundary.
///
/// The row activates and the outgoing main product (whose paid period
/// just ended) expires. If the backing subscription was prematurely
/// canceled, the schedule row is deleted instead of activating.
#[must_use]
pub fn resolve_scheduled_activation(
    scheduled: &CustomerProduct,
    current_main: Option<&CustomerProduct>,
    prematurely_canceled: bool,
) -> BillingPlan {
    let mut plan = BillingPlan::new();

    if prematurely_canceled {
        plan.local.push(LocalOp::DeleteCustomerProduct { id: scheduled.id });
        for schedule_id in &scheduled.schedule_ids {
            plan.processor.push(ProcessorOp::ReleaseSchedule {
                schedule_id: schedule_id.clone(),
            });
        }
        return plan;
    }

    if let Some(current) = current_main {
        plan.local.push(LocalOp::UpdateCustomerProduct {
            id: current.id,
            expected_revision: current.revision,
            update: CustomerProductUpdate {
                status: Some(CustomerProductStatus::Expired),
                ..CustomerProductUpdate::default()
            },
        });
    }

    plan.local.push(LocalOp::UpdateCustomerProduct {
        id: scheduled.id,
        expected_revision: scheduled.revision,
        update: CustomerProductUpdate {
            status: Some(CustomerProductStatus::Active),
            ..CustomerProductUpdate::default()
        },
    });

    plan
}

/// Resolve a usage deduction into a billing plan.
///
/// Deducts `amount` of a feature across the customer's ongoing
/// entitlements in deduction order. Balances floor at zero unless an
/// overage-allowed record exists to absorb the remainder as a negative
/// balance; unlimited grants consume nothing at all.
pub fn resolve_deduction(
    customer: &Customer,
    feature_id: &crate::ids::FeatureId,
    amount: f64,
    entity_id: Option<&EntityId>,
) -> Result<BillingPlan> {
    let statuses = [
        CustomerProductStatus::Active,
        CustomerProductStatus::PastDue,
        CustomerProductStatus::Trialing,
    ];
    let refs: Vec<_> = crate::balance::collect_for_deduction(&customer.products, &statuses, false)
        .into_iter()
        .filter(|r| {
            r.cus_ent.feature_id() == feature_id
                && (r.cus_product.entity_id.is_none()
                    || r.cus_product.entity_id.as_ref() == entity_id)
        })
        .collect();

    if refs.is_empty() {
        return Err(BillingError::FeatureNotFound {
            feature_id: feature_id.clone(),
        });
    }

    let mut plan = BillingPlan::new();

    if refs.iter().any(|r| r.cus_ent.is_unlimited()) {
        return Ok(plan);
    }

    let mut remaining = amount;
    let mut overage_target = None;

    for r in &refs {
        if r.cus_ent.entitlement.feature.feature_type == FeatureType::Boolean {
            continue;
        }
        if r.cus_ent.entitlement.is_entity_scoped() && entity_id.is_none() {
            tracing::debug!(
                feature = %feature_id,
                "skipping entity-scoped entitlement without an entity in the request"
            );
            continue;
        }
        if r.cus_ent.usage_allowed && overage_target.is_none() {
            overage_target = Some(r);
        }
        if remaining <= 0.0 {
            continue;
        }

        let available = crate::balance::entitlement_balance(r.cus_ent, entity_id)
            .balance
            .max(0.0);
        let take = remaining.min(available);
        if take > 0.0 {
            plan.local.push(LocalOp::UpdateEntitlement {
                customer_product_id: r.cus_product.id,
                cus_ent_id: r.cus_ent.id,
                update: EntitlementUpdate {
                    balance_delta: -take,
                    entity_id: r
                        .cus_ent
                        .entitlement
                        .is_entity_scoped()
                        .then(|| entity_id.cloned())
                        .flatten(),
                    next_reset_at: None,
                },
            });
            remaining -= take;
        }
    }

    if remaining > 0.0 {
        if let Some(r) = overage_target {
            plan.local.push(LocalOp::UpdateEntitlement {
                customer_product_id: r.cus_product.id,
                cus_ent_id: r.cus_ent.id,
                update: EntitlementUpdate {
                    balance_delta: -remaining,
                    entity_id: r
                        .cus_ent
                        .entitlement
                        .is_entity_scoped()
                        .then(|| entity_id.cloned())
                        .flatten(),
                    next_reset_at: None,
                },
            });
        } else {
            tracing::warn!(
                feature = %feature_id,
                dropped = remaining,
                "deduction exceeded available balance with no overage grant"
            );
        }
    }

    Ok(plan)
}

/// Resolve cycle resets due at `now` for one attachment.
///
/// Each due entitlement returns to its starting allowance plus any
/// rollover carried from the expiring cycle (bounded by the rollover max),
/// replaceable slots marked for the boundary are dropped, and the reset
/// anchor advances one interval.
#[must_use]
pub fn resolve_resets(cus_product: &CustomerProduct, now: DateTime<Utc>) -> Vec<LocalOp> {
    let mut ops = Vec::new();

    for cus_ent in &cus_product.entitlements {
        let Some(due) = cus_ent.next_reset_at.filter(|t| *t <= now) else {
            continue;
        };
        let Some(current_balance) = cus_ent.balance else {
            continue;
        };

        let options = cus_product.options_for(cus_ent.feature_id());
        let price = cus_product.related_price(cus_ent).map(|cp| &cp.price);
        let fresh = starting_balance(&cus_ent.entitlement, options, price, cus_product.quantity);

        let carried = cus_ent
            .entitlement
            .rollover
            .map_or(0.0, |r| current_balance.max(0.0).min(r.max));

        let next = cus_ent.entitlement.interval.advance(due);
        ops.push(LocalOp::UpdateEntitlement {
            customer_product_id: cus_product.id,
            cus_ent_id: cus_ent.id,
            update: EntitlementUpdate {
                balance_delta: (fresh + carried) - current_balance,
                entity_id: None,
                next_reset_at: next,
            },
        });

        let due_slots: Vec<RowId> = cus_ent
            .replaceables
            .iter()
            .filter(|r| r.delete_next_cycle)
            .map(|r| r.id)
            .collect();
        if !due_slots.is_empty() {
            ops.push(LocalOp::DeleteReplaceables {
                customer_product_id: cus_product.id,
                cus_ent_id: cus_ent.id,
                ids: due_slots,
            });
        }
    }

    ops
}

/// An invariant violation found across a customer's attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// More than one active, recurring, non-add-on product in one
    /// (group, entity) scope.
    DuplicateMainProducts {
        /// The product group.
        group: String,
        /// The entity scope.
        entity_id: Option<EntityId>,
        /// The offending rows.
        row_ids: Vec<RowId>,
    },

    /// A Scheduled row with no ongoing main product in its group/entity.
    OrphanedSchedule {
        /// The orphaned row.
        row_id: RowId,
        /// Its product group.
        group: String,
    },
}

/// Validate the uniqueness and orphan-schedule invariants over a
/// customer's attachments.
#[must_use]
pub fn validate_customer_products(customer: &Customer) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let mains: Vec<&CustomerProduct> = customer
        .products
        .iter()
        .filter(|cp| {
            cp.status.is_ongoing() && !cp.product.is_add_on && !cp.product.is_one_off()
        })
        .collect();

    let mut seen: Vec<(&str, Option<&EntityId>)> = Vec::new();
    for cp in &mains {
        let key = (cp.product.group.as_str(), cp.entity_id.as_ref());
        if seen.contains(&key) {
            let row_ids = mains
                .iter()
                .filter(|c| (c.product.group.as_str(), c.entity_id.as_ref()) == key)
                .map(|c| c.id)
                .collect();
            violations.push(InvariantViolation::DuplicateMainProducts {
                group: cp.product.group.clone(),
                entity_id: cp.entity_id.clone(),
                row_ids,
            });
        } else {
            seen.push(key);
        }
    }

    for cp in &customer.products {
        if cp.status != CustomerProductStatus::Scheduled {
            continue;
        }
        let has_ongoing = mains.iter().any(|m| {
            m.product.group == cp.product.group && m.entity_id == cp.entity_id
        });
        if !has_ongoing {
            violations.push(InvariantViolation::OrphanedSchedule {
                row_id: cp.id,
                group: cp.product.group.clone(),
            });
        }
    }

    violations
}
