//! Background jobs: the cache consistency verifier and the cycle worker.
//!
//! Both run strictly out-of-band. The verifier fires after a mutation's
//! response has already been returned and never blocks a request; the
//! cycle worker ticks on an interval, advancing due entitlement resets and
//! scheduled attachments that reached their phase boundary.

use std::time::Duration;

use chrono::Utc;

use entitle_core::{
    compare_projections, detect_balance_races, existing_in_group, resolve_resets,
    resolve_scheduled_activation, validate_customer_products, CustomerId, CustomerProjection,
};
use entitle_store::Store;

use crate::executor::execute_plan;
use crate::state::AppState;

/// Spawn a consistency check for one customer after a mutation.
///
/// `previous` is the projection computed from durable state before the
/// mutation, used for the balance race heuristic; `None` skips that check
/// (cold start).
pub fn spawn_consistency_check(
    state: AppState,
    customer_id: CustomerId,
    previous: Option<CustomerProjection>,
) {
    tokio::spawn(async move {
        if let Err(e) = run_consistency_check(&state, &customer_id, previous) {
            tracing::warn!(customer = %customer_id, error = %e, "consistency check failed");
        }
    });
}

fn run_consistency_check(
    state: &AppState,
    customer_id: &CustomerId,
    previous: Option<CustomerProjection>,
) -> entitle_store::Result<()> {
    let org_id = &state.org_id;
    let env = state.config.env;

    let Some(customer) = state.store.get_customer(org_id, env, customer_id)? else {
        // Customer deleted since the mutation; nothing to verify.
        return Ok(());
    };
    let fresh = CustomerProjection::from_customer(&customer, Utc::now());

    // Cache comparison: absence is a cold cache, never an error.
    if let Some(cached) = state.store.get_projection(org_id, env, customer_id)? {
        let findings = compare_projections(&cached, &fresh);
        if !findings.is_empty() {
            state.store.delete_projection(org_id, env, customer_id)?;
            for finding in &findings {
                tracing::warn!(
                    customer = %customer_id,
                    finding = ?finding,
                    "cached projection diverged from durable state"
                );
            }
        }
    }

    // Balance race heuristic against the pre-mutation projection.
    if let Some(previous) = previous {
        for race in detect_balance_races(&previous, &fresh) {
            tracing::error!(
                customer = %customer_id,
                feature = %race.feature_id,
                usage_increase = race.usage_increase,
                granted_increase = race.granted_increase,
                "suspected balance read/write race"
            );
        }
    }

    // Structural invariants over the attachments themselves.
    for violation in validate_customer_products(&customer) {
        tracing::error!(
            customer = %customer_id,
            violation = ?violation,
            "customer product invariant violated"
        );
    }

    state.store.put_projection(org_id, env, customer_id, &fresh)?;
    Ok(())
}

/// Spawn the periodic cycle worker: entitlement resets and scheduled
/// activations. Returns immediately; the worker runs until the process
/// exits. Disabled when the configured interval is 0.
pub fn spawn_reset_worker(state: AppState) {
    let interval_seconds = state.config.reset_worker_interval_seconds;
    if interval_seconds == 0 {
        tracing::info!("cycle worker disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = run_reset_pass(&state) {
                tracing::error!(error = %e, "reset pass failed");
            }
            if let Err(e) = run_activation_pass(&state).await {
                tracing::error!(error = %e, "activation pass failed");
            }
        }
    });
}

/// Batch size of one reset pass.
const RESET_BATCH: usize = 200;

fn run_reset_pass(state: &AppState) -> entitle_store::Result<()> {
    let now = Utc::now();
    let due = state.store.list_due_resets(now, RESET_BATCH)?;

    for row in due {
        let ops = resolve_resets(&row, now);
        if ops.is_empty() {
            continue;
        }
        let customer_id = row.customer_id.clone();
        state
            .store
            .apply_plan(&state.org_id, state.config.env, &customer_id, &ops)?;
        state
            .store
            .delete_projection(&state.org_id, state.config.env, &customer_id)?;

        tracing::info!(
            customer = %customer_id,
            row = %row.id,
            resets = ops.len(),
            "entitlement cycle reset applied"
        );
    }

    Ok(())
}

/// Activate Scheduled attachments whose boundary arrived: the outgoing
/// main product expires and the scheduled row takes over. A schedule left
/// without any ongoing product in its group (premature processor-side
/// cancellation) is deleted instead.
async fn run_activation_pass(state: &AppState) -> Result<(), crate::error::ApiError> {
    let now = Utc::now();
    let due = state.store.list_due_activations(now, RESET_BATCH)?;

    for scheduled in due {
        let customer_id = scheduled.customer_id.clone();
        let _guard = state.locks.acquire(&customer_id).await;

        // Re-read under the lock; the row may have been superseded.
        let Some(customer) =
            state
                .store
                .get_customer(&state.org_id, state.config.env, &customer_id)?
        else {
            continue;
        };
        let Some(scheduled) = customer.products.iter().find(|cp| cp.id == scheduled.id) else {
            continue;
        };

        let existing = existing_in_group(
            &customer.products,
            &scheduled.product,
            scheduled.entity_id.as_ref(),
            now,
        );
        let premature = existing.current_main.is_none();
        let plan = resolve_scheduled_activation(scheduled, existing.current_main, premature);

        execute_plan(state, &customer, &plan).await?;
        tracing::info!(
            customer = %customer_id,
            row = %scheduled.id,
            premature,
            "scheduled attachment processed at phase boundary"
        );
    }

    Ok(())
}
