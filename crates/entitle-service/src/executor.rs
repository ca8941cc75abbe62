//! Billing plan execution.
//!
//! Processor actions are issued first, in order, each with an idempotency
//! key derived from the plan id; local state commits only afterwards, in
//! one store batch. A crash between the two leaves local state behind
//! (safely re-derivable from the processor), never ahead.

use entitle_core::{BillingPlan, Customer, CustomerProductStatus, LocalOp, ProcessorOp};
use entitle_store::{Store, StoreError};
use entitle_stripe::StripeError;

use crate::state::AppState;

/// Errors from applying a billing plan.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A processor action failed. Actions before `index` already
    /// succeeded; nothing was rolled back automatically, since voiding a
    /// partially-charged invoice is not always safe. The detail names the
    /// failed sub-action for manual or automated compensation.
    #[error("processor action {index} ({action}) failed after {completed} succeeded: {source}")]
    Processor {
        /// Index of the failed op within the plan.
        index: usize,
        /// Short name of the failed action.
        action: &'static str,
        /// How many processor ops had already succeeded.
        completed: usize,
        /// The underlying processor error.
        source: StripeError,
    },

    /// Applying the local side failed (after all processor ops succeeded).
    #[error("local commit failed: {0}")]
    Store(#[from] StoreError),

    /// The plan carries processor actions but no processor is configured.
    #[error("plan requires a payment processor but none is configured")]
    ProcessorUnavailable,
}

/// Identifiers created on the processor side during execution, fed back
/// into the local rows before commit.
#[derive(Debug, Default)]
struct CreatedIds {
    subscription: Option<String>,
    schedule: Option<String>,
}

/// Apply one billing plan: processor side first, then the local batch,
/// then cache invalidation.
///
/// # Errors
///
/// See [`ExecutionError`]; a processor failure is surfaced with the failed
/// sub-action, and the local side is not applied.
pub async fn execute_plan(
    state: &AppState,
    customer: &Customer,
    plan: &BillingPlan,
) -> Result<(), ExecutionError> {
    let created = run_processor_ops(state, plan).await?;

    let local = backfill_created_ids(&plan.local, &created);
    state
        .store
        .apply_plan(&customer.org_id, customer.env, &customer.id, &local)?;

    if let Err(e) = state
        .store
        .delete_projection(&customer.org_id, customer.env, &customer.id)
    {
        // Invalidation is best-effort; the verifier heals a stale entry.
        tracing::warn!(customer = %customer.id, error = %e, "failed to invalidate projection cache");
    }

    tracing::info!(
        customer = %customer.id,
        plan = %plan.id,
        processor_ops = plan.processor.len(),
        local_ops = local.len(),
        "Billing plan applied"
    );

    Ok(())
}

async fn run_processor_ops(
    state: &AppState,
    plan: &BillingPlan,
) -> Result<CreatedIds, ExecutionError> {
    let mut created = CreatedIds::default();

    if plan.processor.is_empty() {
        return Ok(created);
    }
    let Some(stripe) = state.stripe.as_ref() else {
        return Err(ExecutionError::ProcessorUnavailable);
    };

    for (index, op) in plan.processor.iter().enumerate() {
        let key = plan.idempotency_key(index);
        let failed = |action: &'static str, source: StripeError| ExecutionError::Processor {
            index,
            action,
            completed: index,
            source,
        };

        match op {
            ProcessorOp::CreateSubscription {
                processor_customer_id,
                items,
                trial_end,
                invoice_only,
            } => {
                let subscription = stripe
                    .create_subscription(processor_customer_id, items, *trial_end, *invoice_only, &key)
                    .await
                    .map_err(|e| failed("create_subscription", e))?;
                created.subscription = Some(subscription.id);
            }
            ProcessorOp::UpdateSubscription {
                subscription_id,
                items,
                proration,
            } => {
                stripe
                    .update_subscription(subscription_id, items, *proration, &key)
                    .await
                    .map_err(|e| failed("update_subscription", e))?;
            }
            ProcessorOp::CancelSubscription {
                subscription_id,
                at_period_end,
            } => {
                stripe
                    .cancel_subscription(subscription_id, *at_period_end)
                    .await
                    .map_err(|e| failed("cancel_subscription", e))?;
            }
            ProcessorOp::CreateSchedule {
                processor_customer_id,
                starts_at,
                items,
            } => {
                let schedule = stripe
                    .create_schedule(processor_customer_id, *starts_at, items, &key)
                    .await
                    .map_err(|e| failed("create_schedule", e))?;
                created.schedule = Some(schedule.id);
            }
            ProcessorOp::ReleaseSchedule { schedule_id } => {
                stripe
                    .release_schedule(schedule_id)
                    .await
                    .map_err(|e| failed("release_schedule", e))?;
            }
            ProcessorOp::CreateInvoiceItems {
                processor_customer_id,
                items,
            } => {
                stripe
                    .create_invoice_items(processor_customer_id, items, &key)
                    .await
                    .map_err(|e| failed("create_invoice_items", e))?;
            }
            ProcessorOp::FinalizeInvoice {
                processor_customer_id,
            } => {
                stripe
                    .create_and_finalize_invoice(processor_customer_id, &key)
                    .await
                    .map_err(|e| failed("finalize_invoice", e))?;
            }
        }
    }

    Ok(created)
}

/// Stamp processor-created subscription/schedule ids onto the rows the
/// plan inserts, so local state narrates what actually happened.
fn backfill_created_ids(local: &[LocalOp], created: &CreatedIds) -> Vec<LocalOp> {
    local
        .iter()
        .map(|op| {
            let LocalOp::InsertCustomerProduct(row) = op else {
                return op.clone();
            };
            let mut row = row.clone();

            if row.subscription_ids.is_empty() && row.status != CustomerProductStatus::Scheduled {
                if let Some(subscription_id) = &created.subscription {
                    if !row.product.is_free() && row.product.recurring_interval().is_some() {
                        row.subscription_ids = vec![subscription_id.clone()];
                    }
                }
            }
            if row.status == CustomerProductStatus::Scheduled {
                if let Some(schedule_id) = &created.schedule {
                    row.schedule_ids = vec![schedule_id.clone()];
                }
            }

            LocalOp::InsertCustomerProduct(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use entitle_core::{
        ApiVersion, CustomerId, CustomerProduct, ProductId, RowId, RowKind,
    };

    use super::*;

    fn inserted_row(status: CustomerProductStatus, free: bool) -> CustomerProduct {
        let product = entitle_core::Product {
            id: ProductId::new("pro").unwrap(),
            version: 1,
            name: "pro".into(),
            group: "default".into(),
            is_add_on: false,
            is_default: false,
            entitlements: Vec::new(),
            prices: if free {
                Vec::new()
            } else {
                vec![entitle_core::Price {
                    id: "p".into(),
                    config: entitle_core::PriceConfig::Fixed {
                        amount_cents: 2000,
                        interval: entitle_core::BillingInterval::Month,
                    },
                }]
            },
            free_trial: None,
        };
        CustomerProduct {
            id: RowId::generate(RowKind::CustomerProduct),
            customer_id: CustomerId::new("cus-1").unwrap(),
            product,
            status,
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
            entitlements: Vec::new(),
            prices: Vec::new(),
        }
    }

    #[test]
    fn backfill_attaches_created_subscription() {
        let ops = vec![LocalOp::InsertCustomerProduct(Box::new(inserted_row(
            CustomerProductStatus::Active,
            false,
        )))];
        let created = CreatedIds {
            subscription: Some("sub_new".into()),
            schedule: None,
        };

        let patched = backfill_created_ids(&ops, &created);
        let LocalOp::InsertCustomerProduct(row) = &patched[0] else {
            panic!("expected insert");
        };
        assert_eq!(row.subscription_ids, vec!["sub_new".to_string()]);
    }

    #[test]
    fn backfill_skips_free_products_and_fills_schedules() {
        let ops = vec![
            LocalOp::InsertCustomerProduct(Box::new(inserted_row(
                CustomerProductStatus::Active,
                true,
            ))),
            LocalOp::InsertCustomerProduct(Box::new(inserted_row(
                CustomerProductStatus::Scheduled,
                false,
            ))),
        ];
        let created = CreatedIds {
            subscription: Some("sub_new".into()),
            schedule: Some("sched_new".into()),
        };

        let patched = backfill_created_ids(&ops, &created);
        let LocalOp::InsertCustomerProduct(free_row) = &patched[0] else {
            panic!("expected insert");
        };
        assert!(free_row.subscription_ids.is_empty());

        let LocalOp::InsertCustomerProduct(scheduled_row) = &patched[1] else {
            panic!("expected insert");
        };
        assert_eq!(scheduled_row.schedule_ids, vec!["sched_new".to_string()]);
    }
}
