//! # Private Cycle
//!
//! Builds the graph for one private-scope cycle: optional bootstrap, fetch,
//! reconcile, one atomic local apply, then push.
//!
//! ## Tokens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  zone tokens      written by `apply` for every zone fetched in full    │
//! │  database token   written by `apply` only when no zone fetch failed   │
//! │  initial flag     written by `apply` after a clean cold cycle          │
//! │                                                                         │
//! │  All three share the transaction of the records they describe. If the │
//! │  apply fails nothing moves, and the next cycle replays the same feed. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A zone deleted and re-created since the database token is read without
//! its stored token; the apply purges it before writing the fresh records.
//!
//! Saves for new stations are pushed only if the apply actually gave them
//! their identity. A station deleted mid-cycle is never created remotely.

use std::collections::{BTreeMap, BTreeSet};

use airwave_core::reconcile::{ReconcileInput, ReconcileOutcome, ReconciliationEngine};
use airwave_core::{ChangeToken, DatabaseScope, PendingMutationSet, RecordId, Station, ZoneId};
use airwave_db::{ApplySummary, LocalWriteSet, StateUpdate, SyncStateKey};
use tracing::{debug, info, warn};

use super::push::{push_changes, PushPlan};
use super::subscriptions::add_subscription_stages;
use super::zones::add_zone_stages;
use super::{decode_records, SyncContext};
use crate::error::SyncError;
use crate::executor::{OperationGraph, Priority, Slot};
use crate::fetcher::{ChangeFetcher, DatabaseChanges, ZoneChanges};
use crate::status::SyncPhase;

pub const DATABASE_CHANGES: &str = "private.database_changes";
pub const ZONE_CHANGES: &str = "private.zone_changes";
pub const LOCAL_SNAPSHOT: &str = "private.local_snapshot";
pub const RECONCILE: &str = "private.reconcile";
pub const APPLY: &str = "private.apply";
pub const PUSH: &str = "private.push";

const SCOPE: DatabaseScope = DatabaseScope::Private;

/// Shape of one private cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateCycle {
    /// Reconcile zones and subscriptions first.
    pub bootstrap: bool,
    /// Ignore stored tokens and read every feed from the start.
    pub cold: bool,
    pub priority: Priority,
}

impl PrivateCycle {
    pub fn incremental(priority: Priority) -> Self {
        PrivateCycle {
            bootstrap: false,
            cold: false,
            priority,
        }
    }
}

/// Local side of a cycle, read once.
#[derive(Debug, Clone)]
struct LocalSnapshot {
    mutations: PendingMutationSet,
    changed: Vec<Station>,
}

/// Remote side of a cycle.
#[derive(Debug, Clone)]
struct RemoteSnapshot {
    database: DatabaseChanges,
    zones: ZoneChanges,
}

#[derive(Debug)]
struct ReconciledCycle {
    outcome: ReconcileOutcome,
    remote: Option<RemoteSnapshot>,
    mutations: PendingMutationSet,
    /// Identities the changed stations already had.
    known_identities: Vec<(String, RecordId)>,
}

impl ReconciledCycle {
    /// Builds the push once the apply has run. Saves whose new identity did
    /// not land are dropped.
    fn into_push_plan(self, applied: &ApplySummary) -> PushPlan {
        let unassigned: BTreeSet<&String> = applied.unassigned_stations.iter().collect();
        let (landed, dropped): (Vec<_>, Vec<_>) = self
            .outcome
            .assigned_identities
            .iter()
            .map(|i| (i.station_id.clone(), i.record_id.clone()))
            .partition(|(station_id, _)| !unassigned.contains(station_id));
        let dropped: BTreeSet<RecordId> = dropped.into_iter().map(|(_, id)| id).collect();
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "Stations gone before their identity landed; not pushed");
        }

        let owners = self.push_owners(&landed);
        PushPlan {
            saves: self
                .outcome
                .remote_saves
                .into_iter()
                .filter(|record| !dropped.contains(&record.record_id))
                .collect(),
            deletes: self.outcome.remote_deletes,
            mutation_ids: self.mutations.mutation_ids,
            owners,
        }
    }

    /// Maps each pushed record to the pending rows it retires.
    fn push_owners(&self, landed: &[(String, RecordId)]) -> BTreeMap<RecordId, Vec<String>> {
        let deleted = self
            .mutations
            .deleted
            .iter()
            .map(|d| (&d.station_id, &d.record_id));
        self.known_identities
            .iter()
            .chain(landed.iter())
            .map(|(station_id, record_id)| (station_id, record_id))
            .chain(deleted)
            .map(|(station_id, record_id)| {
                (record_id.clone(), self.mutations.mutation_ids_for(station_id).to_vec())
            })
            .collect()
    }
}

/// Builds the private-scope graph.
pub fn build_private_graph(ctx: &SyncContext, cycle: PrivateCycle) -> OperationGraph {
    let mut graph = OperationGraph::new(if cycle.cold {
        "private-cold"
    } else {
        "private"
    });
    graph.keep_alive("private sync");
    let priority = cycle.priority;

    let database_slot: Slot<DatabaseChanges> = Slot::new();
    let remote_slot: Slot<RemoteSnapshot> = Slot::new();
    let local_slot: Slot<LocalSnapshot> = Slot::new();
    let reconciled_slot: Slot<ReconciledCycle> = Slot::new();
    let push_slot: Slot<PushPlan> = Slot::new();

    let fetch_deps = if cycle.bootstrap {
        let zones = add_zone_stages(&mut graph, ctx, priority, &[]);
        let subscriptions = add_subscription_stages(
            &mut graph,
            ctx,
            SCOPE,
            Some(SyncPhase::ReconcilingSubscriptions),
            priority,
            &[zones],
        );
        vec![subscriptions]
    } else {
        Vec::new()
    };

    let database = {
        let ctx = ctx.clone();
        let database_slot = database_slot.clone();
        graph.add(DATABASE_CHANGES, priority, &fetch_deps, move || async move {
            ctx.status.enter(SCOPE, SyncPhase::FetchingChanges).await;
            let token = if cycle.cold {
                None
            } else {
                ctx.db.sync_state().database_token(SCOPE).await?
            };

            let fetcher = ChangeFetcher::new(ctx.remote.clone(), SCOPE, ctx.settings.fetch_page_size);
            let changes = fetcher.fetch_database_changes(token).await?;
            database_slot.put(changes).await;
            Ok(())
        })
    };

    let zones = {
        let ctx = ctx.clone();
        let remote_slot = remote_slot.clone();
        graph.add(ZONE_CHANGES, priority, &[database], move || async move {
            let database = database_slot
                .take()
                .await
                .ok_or(SyncError::MissingInput("database changes"))?;

            let mut requests: Vec<(ZoneId, Option<ChangeToken>)> = Vec::new();
            for zone in &database.changed_zones {
                let token = if cycle.cold || database.is_recreated(zone) {
                    None
                } else {
                    ctx.db.sync_state().zone_token(SCOPE, zone).await?
                };
                requests.push((zone.clone(), token));
            }

            let fetcher = ChangeFetcher::new(ctx.remote.clone(), SCOPE, ctx.settings.fetch_page_size);
            let zones = fetcher.fetch_zone_changes(&requests).await;
            let failure = zones.first_error().cloned();
            remote_slot.put(RemoteSnapshot { database, zones }).await;

            // Partial results still flow on; the report records the failure.
            match failure {
                Some(err) => Err(err.into()),
                None => Ok(()),
            }
        })
    };

    let local = {
        let ctx = ctx.clone();
        let local_slot = local_slot.clone();
        graph.add(LOCAL_SNAPSHOT, priority, &[], move || async move {
            let mutations = PendingMutationSet::from_mutations(ctx.db.pending_mutations().snapshot().await?);
            let ids: Vec<&str> = mutations.changed_station_ids().collect();
            let changed = ctx.db.stations().get_many(&ids).await?;

            debug!(
                mutations = mutations.mutation_ids.len(),
                changed = changed.len(),
                deleted = mutations.deleted.len(),
                "Local snapshot taken"
            );
            local_slot.put(LocalSnapshot { mutations, changed }).await;
            Ok(())
        })
    };

    let reconcile = {
        let ctx = ctx.clone();
        let reconciled_slot = reconciled_slot.clone();
        graph.add(RECONCILE, priority, &[zones, local], move || async move {
            ctx.status.enter(SCOPE, SyncPhase::Reconciling).await;
            let local = local_slot
                .take()
                .await
                .ok_or(SyncError::MissingInput("local snapshot"))?;
            let remote = remote_slot.take().await;
            if remote.is_none() {
                warn!("Remote changes unavailable; reconciling local changes only");
            }

            let (remote_changed, remote_deleted) = remote
                .as_ref()
                .map(|r| (r.zones.changed.clone(), r.zones.deleted.clone()))
                .unwrap_or_default();
            let known_identities = local
                .changed
                .iter()
                .filter_map(|s| s.record_id.clone().map(|id| (s.id.clone(), id)))
                .collect();

            let input = ReconcileInput {
                local_changed: local.changed,
                local_deleted: local
                    .mutations
                    .deleted
                    .iter()
                    .map(|d| d.record_id.clone())
                    .collect(),
                remote_changed,
                remote_deleted,
            };
            let outcome = ReconciliationEngine::default().reconcile(input);

            debug!(
                local_writes = outcome.local_writes.len(),
                local_deletes = outcome.local_deletes.len(),
                remote_saves = outcome.remote_saves.len(),
                remote_deletes = outcome.remote_deletes.len(),
                new_identities = outcome.assigned_identities.len(),
                acknowledged = outcome.acknowledged_deletes.len(),
                superseded = outcome.superseded_remote.len(),
                "Changes reconciled"
            );

            reconciled_slot
                .put(ReconciledCycle {
                    outcome,
                    remote,
                    mutations: local.mutations,
                    known_identities,
                })
                .await;
            Ok(())
        })
    };

    let apply = {
        let ctx = ctx.clone();
        let push_slot = push_slot.clone();
        graph.add(APPLY, priority, &[reconcile], move || async move {
            let cycle_state = reconciled_slot
                .take()
                .await
                .ok_or(SyncError::MissingInput("reconciled changes"))?;
            let mut set = LocalWriteSet::new(SCOPE);
            set.upserts = decode_records(&cycle_state.outcome.local_writes);
            set.deletes = cycle_state.outcome.local_deletes.clone();
            set.identities = cycle_state.outcome.assigned_identities.clone();

            let mut completed_cold = false;
            if let Some(remote) = &cycle_state.remote {
                set.deleted_zones = remote.database.deleted_zones.clone();
                for zone in &remote.zones.vanished_zones {
                    if !set.deleted_zones.contains(zone) {
                        set.deleted_zones.push(zone.clone());
                    }
                }
                for (zone, token) in &remote.zones.tokens {
                    set.state.push(StateUpdate::SetToken(
                        SyncStateKey::zone_token(SCOPE, zone),
                        token.clone(),
                    ));
                }

                if remote.zones.is_complete() {
                    if let Some(token) = remote.database.token.clone() {
                        set.state.push(StateUpdate::SetToken(SyncStateKey::DatabaseToken(SCOPE), token));
                    }
                    if cycle.cold {
                        set.state.push(StateUpdate::SetFlag(
                            SyncStateKey::InitialPrivateSyncPerformed,
                            true,
                        ));
                        completed_cold = true;
                    }
                } else {
                    warn!(
                        failed = remote.zones.failed_zones.len(),
                        "Some zones failed; database token not advanced"
                    );
                }
            }

            let summary = ctx.db.remote_apply().apply(&set).await?;
            info!(
                inserted = summary.inserted,
                updated = summary.updated,
                deleted = summary.deleted,
                identities = summary.identities_assigned,
                tokens = summary.state_updates,
                "Private changes applied"
            );
            if completed_cold {
                ctx.status.set_initial_private_sync_performed(true).await;
            }

            push_slot.put(cycle_state.into_push_plan(&summary)).await;
            Ok(())
        })
    };

    let ctx = ctx.clone();
    graph.add(PUSH, priority, &[apply], move || async move {
        // Without a committed apply the new identities are not persisted yet.
        let plan = push_slot
            .take()
            .await
            .ok_or(SyncError::MissingInput("applied write-set"))?;
        if plan.has_remote_work() {
            ctx.status.enter(SCOPE, SyncPhase::PushingLocalChanges).await;
        }
        push_changes(&ctx, plan).await?.into_result()?;
        Ok(())
    });

    graph
}
