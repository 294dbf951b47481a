//! # Remote Apply Repository
//!
//! Applies everything one sync cycle decided about the local store in a
//! single transaction.
//!
//! ## One Transaction, All Or Nothing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. deleted zones   every station in the zone; zone token cleared     │
//! │   2. upserts         remote records → stations (matched by record name)│
//! │   3. deletes         remote deletes → stations + their pending rows    │
//! │   4. identities      record ids for new local stations (set once)      │
//! │   5. state           change tokens, flags, last-public-sync            │
//! │   6. discards        pending rows made obsolete by this cycle          │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any error → the transaction is dropped → SQLite rolls back, so tokens │
//! │  can never get ahead of the data they describe.                        │
//! │                                                                         │
//! │  Zones go first: a zone deleted and re-created in the same feed is     │
//! │  purged, then refilled by the upserts, and its cleared token is        │
//! │  replaced by the fresh one in `state`.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use airwave_core::blob;
use airwave_core::codec::DecodedStation;
use airwave_core::reconcile::AssignedIdentity;
use airwave_core::{DatabaseScope, RecordId, ZoneId};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;
use crate::repository::pending::PendingMutationRepository;
use crate::repository::station::StationRepository;
use crate::repository::sync_state::{StateUpdate, SyncStateKey, SyncStateRepository};

/// Local changes decided by one sync cycle.
#[derive(Debug, Clone)]
pub struct LocalWriteSet {
    /// Scope the records came from. Private records become user-defined.
    pub origin: DatabaseScope,
    pub upserts: Vec<DecodedStation>,
    pub deletes: Vec<RecordId>,
    pub deleted_zones: Vec<ZoneId>,
    pub identities: Vec<AssignedIdentity>,
    pub state: Vec<StateUpdate>,
    pub discard_mutations: Vec<String>,
}

impl LocalWriteSet {
    pub fn new(origin: DatabaseScope) -> Self {
        Self {
            origin,
            upserts: Vec::new(),
            deletes: Vec::new(),
            deleted_zones: Vec::new(),
            identities: Vec::new(),
            state: Vec::new(),
            discard_mutations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.deleted_zones.is_empty()
            && self.identities.is_empty()
            && self.state.is_empty()
            && self.discard_mutations.is_empty()
    }
}

/// What an apply actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub identities_assigned: usize,
    pub state_updates: usize,
    pub mutations_discarded: u64,
    /// Stations whose new identity did not land: gone, or already given one.
    pub unassigned_stations: Vec<String>,
}

/// Repository applying [`LocalWriteSet`]s.
#[derive(Debug, Clone)]
pub struct RemoteApplyRepository {
    pool: SqlitePool,
}

impl RemoteApplyRepository {
    /// Creates a new RemoteApplyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RemoteApplyRepository { pool }
    }

    /// Applies a write-set atomically.
    pub async fn apply(&self, set: &LocalWriteSet) -> DbResult<ApplySummary> {
        let mut summary = ApplySummary::default();
        if set.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.pool.begin().await?;

        let mut state = Vec::with_capacity(set.deleted_zones.len() + set.state.len());
        for zone in &set.deleted_zones {
            sqlx::query(
                r#"
                DELETE FROM pending_mutations
                WHERE station_id IN (SELECT id FROM stations WHERE record_zone = ?1)
                "#,
            )
            .bind(&zone.zone_name)
            .execute(&mut *tx)
            .await?;

            let result = sqlx::query("DELETE FROM stations WHERE record_zone = ?1")
                .bind(&zone.zone_name)
                .execute(&mut *tx)
                .await?;
            summary.deleted += result.rows_affected() as usize;

            state.push(StateUpdate::Clear(SyncStateKey::zone_token(set.origin, zone)));
            info!(zone = %zone, removed = result.rows_affected(), "Zone deleted remotely; purged local stations");
        }
        state.extend(set.state.iter().cloned());

        for decoded in &set.upserts {
            let existing =
                StationRepository::fetch_by_record_name_in(&mut tx, &decoded.record_id.record_name)
                    .await?;
            match existing {
                Some(station) => {
                    StationRepository::update_fields_in(&mut tx, &station, &decoded.fields).await?;
                    summary.updated += 1;
                }
                None => {
                    StationRepository::insert_in(
                        &mut tx,
                        &decoded.fields,
                        set.origin.is_user_scope(),
                        Some(&decoded.record_id),
                    )
                    .await?;
                    summary.inserted += 1;
                }
            }
        }

        for record_id in &set.deletes {
            let existing =
                StationRepository::fetch_by_record_name_in(&mut tx, &record_id.record_name).await?;
            // Unknown identities are a no-op.
            if let Some(station) = existing {
                sqlx::query("DELETE FROM stations WHERE id = ?1")
                    .bind(&station.id)
                    .execute(&mut *tx)
                    .await?;
                PendingMutationRepository::forget_station(&mut tx, &station.id).await?;
                summary.deleted += 1;
            }
        }

        for identity in &set.identities {
            let record_blob = blob::encode_record_id(&identity.record_id)?;
            let result = sqlx::query(
                r#"
                UPDATE stations SET
                    record_name = ?2,
                    record_zone = ?3,
                    record_id = ?4
                WHERE id = ?1 AND record_id IS NULL
                "#,
            )
            .bind(&identity.station_id)
            .bind(&identity.record_id.record_name)
            .bind(&identity.record_id.zone_id.zone_name)
            .bind(record_blob)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                summary.identities_assigned += 1;
            } else {
                debug!(station_id = %identity.station_id, "Identity already assigned or station gone");
                summary.unassigned_stations.push(identity.station_id.clone());
            }
        }

        SyncStateRepository::apply_in(&mut tx, &state).await?;
        summary.state_updates = state.len();

        summary.mutations_discarded =
            PendingMutationRepository::discard_in(&mut tx, &set.discard_mutations).await?;

        tx.commit().await?;

        debug!(origin = %set.origin, ?summary, "Write-set applied");
        Ok(summary)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use airwave_core::{ChangeToken, StationFields};

    fn zone() -> ZoneId {
        ZoneId::new("RadioZone")
    }

    fn decoded(name: &str, station_name: &str) -> DecodedStation {
        DecodedStation {
            record_id: RecordId::new(name, zone()),
            fields: StationFields::new(station_name),
            modified_at: None,
        }
    }

    fn token_update(byte: u8) -> StateUpdate {
        StateUpdate::SetToken(
            SyncStateKey::zone_token(DatabaseScope::Private, &zone()),
            ChangeToken::from_bytes(vec![byte]),
        )
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts.push(decoded("A", "first"));
        set.state.push(token_update(1));
        let summary = db.remote_apply().apply(&set).await.unwrap();
        assert_eq!(summary.inserted, 1);

        let station = db.stations().get_by_record_name("A").await.unwrap().unwrap();
        assert!(station.is_user_defined);
        assert_eq!(station.record_id, Some(RecordId::new("A", zone())));

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts.push(decoded("A", "second"));
        let summary = db.remote_apply().apply(&set).await.unwrap();
        assert_eq!(summary.updated, 1);

        let reloaded = db.stations().get_by_id(&station.id).await.unwrap().unwrap();
        assert_eq!(reloaded.fields.name, "second");
        assert_eq!(reloaded.created_at, station.created_at);
        // Remote writes never create pending mutations.
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_public_records_are_not_user_defined() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Public);
        set.upserts.push(DecodedStation {
            record_id: RecordId::new("P", ZoneId::default_zone()),
            fields: StationFields::new("Public"),
            modified_at: None,
        });
        db.remote_apply().apply(&set).await.unwrap();

        let station = db.stations().get_by_record_name("P").await.unwrap().unwrap();
        assert!(!station.is_user_defined);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_identity_is_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.deletes.push(RecordId::new("ghost", zone()));
        let summary = db.remote_apply().apply(&set).await.unwrap();

        assert_eq!(summary.deleted, 0);
    }

    #[tokio::test]
    async fn test_remote_delete_drops_pending_edits() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let station = db.stations().create(StationFields::new("Mine")).await.unwrap();
        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.identities.push(AssignedIdentity {
            station_id: station.id.clone(),
            record_id: RecordId::new("M", zone()),
        });
        db.remote_apply().apply(&set).await.unwrap();
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 1);

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.deletes.push(RecordId::new("M", zone()));
        let summary = db.remote_apply().apply(&set).await.unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(db.stations().get_by_id(&station.id).await.unwrap().is_none());
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identity_is_assigned_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let station = db.stations().create(StationFields::new("New")).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.identities.push(AssignedIdentity {
            station_id: station.id.clone(),
            record_id: RecordId::new("FIRST", zone()),
        });
        assert_eq!(db.remote_apply().apply(&set).await.unwrap().identities_assigned, 1);

        set.identities[0].record_id = RecordId::new("SECOND", zone());
        let summary = db.remote_apply().apply(&set).await.unwrap();
        assert_eq!(summary.identities_assigned, 0);
        assert_eq!(summary.unassigned_stations, vec![station.id.clone()]);

        let reloaded = db.stations().get_by_id(&station.id).await.unwrap().unwrap();
        assert_eq!(reloaded.record_name(), Some("FIRST"));
    }

    #[tokio::test]
    async fn test_deleted_zone_purges_stations_and_token() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts.push(decoded("A", "a"));
        set.upserts.push(decoded("B", "b"));
        set.state.push(token_update(7));
        db.remote_apply().apply(&set).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.deleted_zones.push(zone());
        let summary = db.remote_apply().apply(&set).await.unwrap();

        assert_eq!(summary.deleted, 2);
        assert_eq!(db.stations().count().await.unwrap(), 0);
        assert!(db
            .sync_state()
            .zone_token(DatabaseScope::Private, &zone())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_identity_for_deleted_station_is_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let kept = db.stations().create(StationFields::new("Kept")).await.unwrap();
        let gone = db.stations().create(StationFields::new("Gone")).await.unwrap();
        db.stations().delete(&gone.id).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        for (station, name) in [(&kept, "K"), (&gone, "G")] {
            set.identities.push(AssignedIdentity {
                station_id: station.id.clone(),
                record_id: RecordId::new(name, zone()),
            });
        }
        let summary = db.remote_apply().apply(&set).await.unwrap();

        assert_eq!(summary.identities_assigned, 1);
        assert_eq!(summary.unassigned_stations, vec![gone.id.clone()]);
        assert!(db.stations().get_by_record_name("G").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recreated_zone_is_purged_then_refilled() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts.push(decoded("OLD", "old"));
        set.state.push(token_update(1));
        db.remote_apply().apply(&set).await.unwrap();

        // The zone went away and came back with a new record in one feed.
        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.deleted_zones.push(zone());
        set.upserts.push(decoded("NEW", "new"));
        set.state.push(token_update(2));
        let summary = db.remote_apply().apply(&set).await.unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.inserted, 1);
        assert!(db.stations().get_by_record_name("OLD").await.unwrap().is_none());
        assert!(db.stations().get_by_record_name("NEW").await.unwrap().is_some());
        assert_eq!(
            db.sync_state()
                .zone_token(DatabaseScope::Private, &zone())
                .await
                .unwrap(),
            Some(ChangeToken::from_bytes(vec![2]))
        );
    }

    #[tokio::test]
    async fn test_failure_rolls_back_tokens_and_records() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let a = db.stations().create(StationFields::new("a")).await.unwrap();
        let b = db.stations().create(StationFields::new("b")).await.unwrap();

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts.push(decoded("X", "x"));
        set.state.push(token_update(9));
        // Same record name for two stations violates UNIQUE(record_name).
        for station in [&a, &b] {
            set.identities.push(AssignedIdentity {
                station_id: station.id.clone(),
                record_id: RecordId::new("DUP", zone()),
            });
        }

        assert!(db.remote_apply().apply(&set).await.is_err());

        assert!(db.stations().get_by_record_name("X").await.unwrap().is_none());
        assert!(db
            .sync_state()
            .zone_token(DatabaseScope::Private, &zone())
            .await
            .unwrap()
            .is_none());
    }
}
