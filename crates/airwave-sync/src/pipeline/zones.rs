//! Zone bootstrap stages: list the private zones, diff them against the
//! expected set, create what is missing and delete orphans.

use airwave_core::zones::{ZonePlan, ZoneReconciler};
use airwave_core::{DatabaseScope, ZoneId};
use tracing::{debug, info};

use super::{log_item_errors, SyncContext};
use crate::error::SyncError;
use crate::executor::{OpId, OperationGraph, Priority, Slot};
use crate::status::SyncPhase;

pub const ZONES_FETCH: &str = "private.zones.fetch";
pub const ZONES_PLAN: &str = "private.zones.plan";
pub const ZONES_MODIFY: &str = "private.zones.modify";

/// Adds the zone stages after `deps` and returns the last one.
pub fn add_zone_stages(
    graph: &mut OperationGraph,
    ctx: &SyncContext,
    priority: Priority,
    deps: &[OpId],
) -> OpId {
    let existing: Slot<Vec<ZoneId>> = Slot::new();
    let plan: Slot<ZonePlan> = Slot::new();

    let fetch = {
        let ctx = ctx.clone();
        let existing = existing.clone();
        graph.add(ZONES_FETCH, priority, deps, move || async move {
            ctx.status
                .enter(DatabaseScope::Private, SyncPhase::BootstrappingZones)
                .await;
            let zones = ctx.remote.list_zones(DatabaseScope::Private).await?;
            debug!(count = zones.len(), "Remote zones listed");
            existing.put(zones).await;
            Ok(())
        })
    };

    let planned = {
        let plan = plan.clone();
        graph.add(ZONES_PLAN, priority, &[fetch], move || async move {
            let zones = existing
                .take()
                .await
                .ok_or(SyncError::MissingInput("remote zone list"))?;
            plan.put(ZoneReconciler::default().plan(&zones)).await;
            Ok(())
        })
    };

    let ctx = ctx.clone();
    graph.add(ZONES_MODIFY, priority, &[planned], move || async move {
        let plan = plan.take().await.ok_or(SyncError::MissingInput("zone plan"))?;
        if plan.is_empty() {
            debug!("Zones up to date");
            return Ok(());
        }

        let outcome = ctx
            .remote
            .modify_zones(DatabaseScope::Private, &plan.to_create, &plan.to_delete)
            .await?;
        log_item_errors("Zone change", &outcome.save_errors);
        log_item_errors("Zone change", &outcome.delete_errors);

        info!(
            created = outcome.saved.len(),
            deleted = outcome.deleted.len(),
            rejected = outcome.error_count(),
            "Zones reconciled"
        );
        Ok(())
    })
}
