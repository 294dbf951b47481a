//! Subscription stages: make sure the scope has its station subscription.

use std::collections::BTreeMap;

use airwave_core::subscriptions::{Subscription, SubscriptionPlan, SubscriptionReconciler};
use airwave_core::DatabaseScope;
use tracing::{debug, info};

use super::{log_item_errors, SyncContext};
use crate::error::SyncError;
use crate::executor::{OpId, OperationGraph, Priority, Slot};
use crate::status::SyncPhase;

pub fn fetch_op_name(scope: DatabaseScope) -> String {
    format!("{}.subscriptions.fetch", scope)
}

pub fn plan_op_name(scope: DatabaseScope) -> String {
    format!("{}.subscriptions.plan", scope)
}

pub fn modify_op_name(scope: DatabaseScope) -> String {
    format!("{}.subscriptions.modify", scope)
}

/// Adds fetch → plan → modify for `scope` after `deps`.
///
/// `phase` is entered when the fetch starts; the public cycle has no phase
/// of its own for this.
pub fn add_subscription_stages(
    graph: &mut OperationGraph,
    ctx: &SyncContext,
    scope: DatabaseScope,
    phase: Option<SyncPhase>,
    priority: Priority,
    deps: &[OpId],
) -> OpId {
    let existing: Slot<BTreeMap<String, Subscription>> = Slot::new();
    let plan: Slot<SubscriptionPlan> = Slot::new();

    let fetch = {
        let ctx = ctx.clone();
        let existing = existing.clone();
        graph.add(fetch_op_name(scope), priority, deps, move || async move {
            if let Some(phase) = phase {
                ctx.status.enter(scope, phase).await;
            }
            let subscriptions = ctx.remote.list_subscriptions(scope).await?;
            debug!(scope = %scope, count = subscriptions.len(), "Subscriptions listed");
            existing.put(subscriptions).await;
            Ok(())
        })
    };

    let planned = {
        let plan = plan.clone();
        graph.add(plan_op_name(scope), priority, &[fetch], move || async move {
            let subscriptions = existing
                .take()
                .await
                .ok_or(SyncError::MissingInput("subscription list"))?;
            plan.put(SubscriptionReconciler::stations(scope).plan(&subscriptions))
                .await;
            Ok(())
        })
    };

    let ctx = ctx.clone();
    graph.add(modify_op_name(scope), priority, &[planned], move || async move {
        let plan = plan
            .take()
            .await
            .ok_or(SyncError::MissingInput("subscription plan"))?;
        if plan.is_empty() {
            debug!(scope = %scope, "Subscriptions up to date");
            return Ok(());
        }

        let outcome = ctx
            .remote
            .modify_subscriptions(scope, &plan.to_create, &plan.to_delete)
            .await?;
        log_item_errors("Subscription", &outcome.save_errors);
        log_item_errors("Subscription", &outcome.delete_errors);

        info!(
            scope = %scope,
            created = outcome.saved.len(),
            rejected = outcome.error_count(),
            "Subscriptions reconciled"
        );
        Ok(())
    })
}
