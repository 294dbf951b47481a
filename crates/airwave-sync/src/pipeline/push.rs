//! # Push Stage
//!
//! Sends the remote write-set of a cycle and retires the pending mutations
//! it was built from.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. save/delete in batches of `save_batch_size`                        │
//! │  2. transport failure → stop, keep every mutation for the next cycle  │
//! │  3. all batches sent   → discard the snapshot's mutation ids, except   │
//! │                          those owned by a rejected record              │
//! │  4. any rejection      → the stage fails once the discard is done      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! New records already carry the identity persisted by the apply stage, so
//! a retried push overwrites the record instead of creating a second one.

use std::collections::{BTreeMap, BTreeSet};

use airwave_core::{DatabaseScope, RecordId, RemoteRecord};
use tracing::{debug, info, warn};

use super::{log_item_errors, SyncContext};
use crate::error::{RemoteError, SyncError, SyncResult};

/// What the push stage sends.
#[derive(Debug, Clone, Default)]
pub struct PushPlan {
    pub saves: Vec<RemoteRecord>,
    pub deletes: Vec<RecordId>,
    /// Pending mutations covered by this plan.
    pub mutation_ids: Vec<String>,
    /// Mutation ids behind each pushed record. A rejected record keeps these.
    pub owners: BTreeMap<RecordId, Vec<String>>,
}

impl PushPlan {
    pub fn has_remote_work(&self) -> bool {
        !self.saves.is_empty() || !self.deletes.is_empty()
    }

    /// Mutation ids to retire when `rejected` records were refused.
    fn discardable(&self, rejected: &BTreeSet<RecordId>) -> Vec<String> {
        let kept: BTreeSet<&String> = rejected
            .iter()
            .filter_map(|id| self.owners.get(id))
            .flatten()
            .collect();
        self.mutation_ids
            .iter()
            .filter(|id| !kept.contains(id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub requests: usize,
    pub saved: usize,
    pub deleted: usize,
    pub rejected: usize,
    pub mutations_discarded: u64,
    pub mutations_kept: usize,
    pub first_rejection: Option<RemoteError>,
}

impl PushSummary {
    /// Fails when any record was refused, so the cycle reports it.
    pub fn into_result(self) -> SyncResult<PushSummary> {
        match self.first_rejection.clone() {
            Some(first) => Err(SyncError::PushRejected {
                rejected: self.rejected,
                first,
            }),
            None => Ok(self),
        }
    }
}

/// Pairs save and delete chunks into requests of at most `batch_size` each.
pub(crate) fn batches<'a>(
    saves: &'a [RemoteRecord],
    deletes: &'a [RecordId],
    batch_size: usize,
) -> Vec<(&'a [RemoteRecord], &'a [RecordId])> {
    let batch_size = batch_size.max(1);
    let mut save_chunks = saves.chunks(batch_size);
    let mut delete_chunks = deletes.chunks(batch_size);
    let mut requests = Vec::new();

    loop {
        match (save_chunks.next(), delete_chunks.next()) {
            (None, None) => break,
            (s, d) => requests.push((s.unwrap_or(&[]), d.unwrap_or(&[]))),
        }
    }
    requests
}

/// Pushes `plan` to the private scope.
pub async fn push_changes(ctx: &SyncContext, plan: PushPlan) -> SyncResult<PushSummary> {
    let scope = DatabaseScope::Private;
    let mut summary = PushSummary::default();
    let mut rejected: BTreeSet<RecordId> = BTreeSet::new();

    for (saves, deletes) in batches(&plan.saves, &plan.deletes, ctx.settings.save_batch_size) {
        let outcome = ctx.remote.modify_records(scope, saves, deletes).await?;
        log_item_errors("Record save", &outcome.save_errors);
        log_item_errors("Record delete", &outcome.delete_errors);

        summary.requests += 1;
        summary.saved += outcome.saved.len();
        summary.deleted += outcome.deleted.len();
        summary.rejected += outcome.error_count();

        let first = outcome
            .save_errors
            .first()
            .map(|e| &e.error)
            .or_else(|| outcome.delete_errors.first().map(|e| &e.error));
        if summary.first_rejection.is_none() {
            summary.first_rejection = first.cloned();
        }
        rejected.extend(outcome.save_errors.into_iter().map(|e| e.item.record_id));
        rejected.extend(outcome.delete_errors.into_iter().map(|e| e.item));
        debug!(request = summary.requests, saves = saves.len(), deletes = deletes.len(), "Push batch sent");
    }

    let discardable = plan.discardable(&rejected);
    summary.mutations_kept = plan.mutation_ids.len() - discardable.len();
    summary.mutations_discarded = ctx.db.pending_mutations().discard(&discardable).await?;
    if summary.mutations_kept > 0 {
        warn!(kept = summary.mutations_kept, "Rejected changes stay pending for the next cycle");
    }

    info!(
        requests = summary.requests,
        saved = summary.saved,
        deleted = summary.deleted,
        rejected = summary.rejected,
        discarded = summary.mutations_discarded,
        "Local changes pushed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::pipeline::test_support::context;
    use crate::remote::{InMemoryRemoteStore, InjectedFailure, RemoteOp};
    use airwave_core::codec::encode_station;
    use airwave_core::{StationFields, ZoneId};
    use std::sync::Arc;

    fn record(name: &str) -> RemoteRecord {
        encode_station(&StationFields::new(name), RecordId::new(name, ZoneId::new("RadioZone")))
    }

    #[test]
    fn test_batches_pair_chunks() {
        let saves: Vec<_> = (0..5).map(|i| record(&format!("S{}", i))).collect();
        let deletes = vec![RecordId::new("D", ZoneId::new("RadioZone"))];

        let requests = batches(&saves, &deletes, 2);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0.len(), 2);
        assert_eq!(requests[0].1.len(), 1);
        assert_eq!(requests[2].0.len(), 1);
        assert!(requests[2].1.is_empty());

        assert!(batches(&[], &[], 2).is_empty());
    }

    async fn pending_ids(ctx: &SyncContext) -> Vec<String> {
        ctx.db
            .pending_mutations()
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect()
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_mutations() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.seed_zone(DatabaseScope::Private, ZoneId::new("RadioZone")).await;
        let ctx = context(remote.clone()).await;

        ctx.db.stations().create(StationFields::new("Local")).await.unwrap();
        let plan = PushPlan {
            saves: vec![record("A")],
            mutation_ids: pending_ids(&ctx).await,
            ..Default::default()
        };

        remote
            .fail_next(RemoteOp::ModifyRecords, InjectedFailure::Fail(RemoteError::Timeout))
            .await;
        assert!(push_changes(&ctx, plan.clone()).await.is_err());
        assert_eq!(ctx.db.pending_mutations().count_pending().await.unwrap(), 1);

        let summary = push_changes(&ctx, plan).await.unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.mutations_discarded, 1);
        assert_eq!(ctx.db.pending_mutations().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_record_keeps_its_mutations() {
        // Only the radio zone exists; a save into any other zone is refused.
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.seed_zone(DatabaseScope::Private, ZoneId::new("RadioZone")).await;
        let ctx = context(remote.clone()).await;

        let accepted = ctx.db.stations().create(StationFields::new("Accepted")).await.unwrap();
        let refused = ctx.db.stations().create(StationFields::new("Refused")).await.unwrap();
        let snapshot = ctx.db.pending_mutations().snapshot().await.unwrap();
        let owned_by = |station_id: &str| -> Vec<String> {
            snapshot
                .iter()
                .filter(|m| m.station_id == station_id)
                .map(|m| m.id.clone())
                .collect()
        };

        let good = record("A");
        let bad = encode_station(
            &StationFields::new("Refused"),
            RecordId::new("B", ZoneId::new("MissingZone")),
        );
        let mut owners = BTreeMap::new();
        owners.insert(good.record_id.clone(), owned_by(&accepted.id));
        owners.insert(bad.record_id.clone(), owned_by(&refused.id));
        let plan = PushPlan {
            saves: vec![good, bad.clone()],
            deletes: Vec::new(),
            mutation_ids: snapshot.iter().map(|m| m.id.clone()).collect(),
            owners,
        };

        let summary = push_changes(&ctx, plan).await.unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.mutations_discarded, 1);
        assert_eq!(summary.mutations_kept, 1);
        assert_eq!(
            summary.first_rejection,
            Some(RemoteError::ZoneNotFound(ZoneId::new("MissingZone")))
        );

        let left = ctx.db.pending_mutations().snapshot().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].station_id, refused.id);
        assert!(remote.record(DatabaseScope::Private, &bad.record_id).await.is_none());

        match summary.into_result() {
            Err(SyncError::PushRejected { rejected, .. }) => assert_eq!(rejected, 1),
            other => panic!("expected a rejection, got {:?}", other),
        }
    }
}
