//! # Pending Mutation Repository
//!
//! The outbox of local station writes waiting to be pushed.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., rename a station)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. UPDATE stations SET name = ? WHERE id = ?                   │   │
//! │  │  2. INSERT INTO pending_mutations (station_id, kind, ...)       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            PUSH STAGE (airwave-sync)                            │   │
//! │  │  1. snapshot()         - read once, oldest first                │   │
//! │  │  2. push to remote store                                        │   │
//! │  │  3. discard(ids)       - exactly the rows from the snapshot     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Rows written after the snapshot survive step 3 and go out next cycle. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use airwave_core::blob;
use airwave_core::{MutationKind, PendingMutation, RecordId};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct PendingMutationRow {
    id: String,
    station_id: String,
    kind: MutationKind,
    record_id: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingMutationRow> for PendingMutation {
    type Error = crate::error::DbError;

    fn try_from(row: PendingMutationRow) -> Result<Self, Self::Error> {
        let record_id = row
            .record_id
            .as_deref()
            .map(blob::decode_record_id)
            .transpose()?;

        Ok(PendingMutation {
            id: row.id,
            station_id: row.station_id,
            kind: row.kind,
            record_id,
            created_at: row.created_at,
        })
    }
}

/// Repository for pending mutation operations.
#[derive(Debug, Clone)]
pub struct PendingMutationRepository {
    pool: SqlitePool,
}

impl PendingMutationRepository {
    /// Creates a new PendingMutationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PendingMutationRepository { pool }
    }

    /// Records a mutation on an open transaction's connection.
    ///
    /// Callers pass `&mut *tx` so the row commits with the station write.
    pub(crate) async fn record(
        conn: &mut SqliteConnection,
        station_id: &str,
        kind: MutationKind,
        record_id: Option<&RecordId>,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        let record_blob = record_id.map(blob::encode_record_id).transpose()?;

        debug!(station_id = %station_id, kind = %kind, "Recording pending mutation");

        sqlx::query(
            r#"
            INSERT INTO pending_mutations (id, seq, station_id, kind, record_id, created_at)
            VALUES (
                ?1,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_mutations),
                ?2, ?3, ?4, ?5
            )
            "#,
        )
        .bind(&id)
        .bind(station_id)
        .bind(kind)
        .bind(record_blob)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Drops every pending row for a station (remote delete wins).
    pub(crate) async fn forget_station(
        conn: &mut SqliteConnection,
        station_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM pending_mutations WHERE station_id = ?1")
            .bind(station_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes the given rows on an open transaction's connection.
    pub(crate) async fn discard_in(conn: &mut SqliteConnection, ids: &[String]) -> DbResult<u64> {
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM pending_mutations WHERE id = ?1")
                .bind(id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }

    /// Reads every pending mutation, oldest first.
    pub async fn snapshot(&self) -> DbResult<Vec<PendingMutation>> {
        let rows: Vec<PendingMutationRow> = sqlx::query_as(
            r#"
            SELECT id, station_id, kind, record_id, created_at
            FROM pending_mutations
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PendingMutation::try_from).collect()
    }

    /// Deletes exactly the rows consumed by a push.
    ///
    /// ## Returns
    /// Number of deleted rows.
    pub async fn discard(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let removed = Self::discard_in(&mut tx, ids).await?;
        tx.commit().await?;

        debug!(removed, "Discarded pending mutations");
        Ok(removed)
    }

    /// Returns true if the station has unpushed local changes.
    pub async fn has_pending(&self, station_id: &str) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_mutations WHERE station_id = ?1")
                .bind(station_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    /// Counts pending mutations.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_mutations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use airwave_core::ZoneId;

    #[tokio::test]
    async fn test_record_snapshot_discard() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.pending_mutations();
        let rid = RecordId::new("R1", ZoneId::new("RadioZone"));

        let mut tx = db.pool().begin().await.unwrap();
        let first = PendingMutationRepository::record(&mut tx, "s1", MutationKind::Inserted, None)
            .await
            .unwrap();
        PendingMutationRepository::record(&mut tx, "s2", MutationKind::Deleted, Some(&rid))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let snapshot = repo.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, first);
        assert_eq!(snapshot[1].kind, MutationKind::Deleted);
        assert_eq!(snapshot[1].record_id.as_ref(), Some(&rid));

        assert!(repo.has_pending("s1").await.unwrap());
        assert_eq!(repo.discard(&[first]).await.unwrap(), 1);
        assert_eq!(repo.count_pending().await.unwrap(), 1);
        assert!(!repo.has_pending("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_mutation_is_rolled_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        {
            let mut tx = db.pool().begin().await.unwrap();
            PendingMutationRepository::record(&mut tx, "s1", MutationKind::Updated, None)
                .await
                .unwrap();
            // Dropped without commit.
        }

        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 0);
    }
}
