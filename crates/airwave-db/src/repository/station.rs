//! # Station Repository
//!
//! Local CRUD for stations. Every user-facing write runs in one transaction
//! with its pending mutation row (see [`pending`](super::pending)).
//!
//! ## Which writes are captured
//! ```text
//! ┌────────────────────────┬───────────────────┬──────────────────────────┐
//! │ Operation              │ is_user_defined   │ pending mutation         │
//! ├────────────────────────┼───────────────────┼──────────────────────────┤
//! │ create                 │ always true       │ inserted                 │
//! │ update / soft delete   │ true              │ updated                  │
//! │ update / soft delete   │ false (public)    │ none (local only)        │
//! │ delete                 │ true              │ deleted (+ record id)    │
//! │ delete                 │ false (public)    │ none                     │
//! └────────────────────────┴───────────────────┴──────────────────────────┘
//! ```
//!
//! Timestamps are owned here: `created_at` is set once, `updated_at` never
//! moves backwards even if the wall clock does.

use airwave_core::blob;
use airwave_core::validation::validate_station_fields;
use airwave_core::{MutationKind, RecordId, Station, StationFields};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::pending::PendingMutationRepository;

pub(crate) const STATION_COLUMNS: &str = "id, record_id, name, url, city, country, description, \
     is_user_defined, is_soft_deleted, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StationRow {
    id: String,
    record_id: Option<Vec<u8>>,
    name: String,
    url: Option<String>,
    city: Option<String>,
    country: Option<String>,
    description: Option<String>,
    is_user_defined: bool,
    is_soft_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StationRow> for Station {
    type Error = DbError;

    fn try_from(row: StationRow) -> Result<Self, Self::Error> {
        let record_id = row
            .record_id
            .as_deref()
            .map(blob::decode_record_id)
            .transpose()?;

        Ok(Station {
            id: row.id,
            record_id,
            fields: StationFields {
                name: row.name,
                url: row.url,
                city: row.city,
                country: row.country,
                description: row.description,
                is_soft_deleted: row.is_soft_deleted,
            },
            is_user_defined: row.is_user_defined,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `updated_at` for a write happening now.
pub(crate) fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}

/// Repository for station database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.stations();
/// let station = repo.create(StationFields::new("Radio 1")).await?;
/// repo.set_soft_deleted(&station.id, true).await?;
/// ```
#[derive(Debug, Clone)]
pub struct StationRepository {
    pool: SqlitePool,
}

impl StationRepository {
    /// Creates a new StationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StationRepository { pool }
    }

    // =========================================================================
    // Connection-level helpers (used inside other repositories' transactions)
    // =========================================================================

    pub(crate) async fn fetch_by_id_in(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Station>> {
        let sql = format!("SELECT {} FROM stations WHERE id = ?1", STATION_COLUMNS);
        let row: Option<StationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(Station::try_from).transpose()
    }

    pub(crate) async fn fetch_by_record_name_in(
        conn: &mut SqliteConnection,
        record_name: &str,
    ) -> DbResult<Option<Station>> {
        let sql = format!("SELECT {} FROM stations WHERE record_name = ?1", STATION_COLUMNS);
        let row: Option<StationRow> = sqlx::query_as(&sql)
            .bind(record_name)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(Station::try_from).transpose()
    }

    async fn write_fields_in(
        conn: &mut SqliteConnection,
        id: &str,
        fields: &StationFields,
        updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE stations SET
                name = ?2,
                url = ?3,
                city = ?4,
                country = ?5,
                description = ?6,
                is_soft_deleted = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.url)
        .bind(&fields.city)
        .bind(&fields.country)
        .bind(&fields.description)
        .bind(fields.is_soft_deleted)
        .bind(updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub(crate) async fn insert_in(
        conn: &mut SqliteConnection,
        fields: &StationFields,
        is_user_defined: bool,
        record: Option<&RecordId>,
    ) -> DbResult<Station> {
        let now = Utc::now();
        let record_blob = record.map(blob::encode_record_id).transpose()?;

        let station = Station {
            id: Uuid::new_v4().to_string(),
            record_id: record.cloned(),
            fields: fields.clone(),
            is_user_defined,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO stations (
                id, record_name, record_zone, record_id, name, url, city, country,
                description, is_user_defined, is_soft_deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&station.id)
        .bind(record.map(|r| r.record_name.as_str()))
        .bind(record.map(|r| r.zone_id.zone_name.as_str()))
        .bind(record_blob)
        .bind(&fields.name)
        .bind(&fields.url)
        .bind(&fields.city)
        .bind(&fields.country)
        .bind(&fields.description)
        .bind(is_user_defined)
        .bind(fields.is_soft_deleted)
        .bind(station.created_at)
        .bind(station.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(station)
    }

    /// Overwrites business fields, keeping identity and `created_at`.
    pub(crate) async fn update_fields_in(
        conn: &mut SqliteConnection,
        existing: &Station,
        fields: &StationFields,
    ) -> DbResult<Station> {
        let updated_at = next_updated_at(existing.updated_at);
        Self::write_fields_in(conn, &existing.id, fields, updated_at).await?;

        Ok(Station {
            fields: fields.clone(),
            updated_at,
            ..existing.clone()
        })
    }

    // =========================================================================
    // Local user operations
    // =========================================================================

    /// Creates a user-defined station and queues it for push.
    pub async fn create(&self, fields: StationFields) -> DbResult<Station> {
        validate_station_fields(&fields)?;

        let mut tx = self.pool.begin().await?;
        let station = Self::insert_in(&mut tx, &fields, true, None).await?;
        PendingMutationRepository::record(&mut tx, &station.id, MutationKind::Inserted, None)
            .await?;
        tx.commit().await?;

        info!(station_id = %station.id, name = %station.fields.name, "Station created");
        Ok(station)
    }

    /// Replaces a station's business fields.
    pub async fn update(&self, id: &str, fields: StationFields) -> DbResult<Station> {
        validate_station_fields(&fields)?;

        let mut tx = self.pool.begin().await?;
        let existing = Self::fetch_by_id_in(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Station", id))?;

        let station = Self::update_fields_in(&mut tx, &existing, &fields).await?;
        if station.is_user_defined {
            PendingMutationRepository::record(
                &mut tx,
                &station.id,
                MutationKind::Updated,
                station.record_id.as_ref(),
            )
            .await?;
        }
        tx.commit().await?;

        debug!(station_id = %id, "Station updated");
        Ok(station)
    }

    /// Flips the soft-delete flag.
    pub async fn set_soft_deleted(&self, id: &str, soft_deleted: bool) -> DbResult<Station> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Station", id))?;

        let fields = StationFields {
            is_soft_deleted: soft_deleted,
            ..existing.fields
        };
        self.update(id, fields).await
    }

    /// Hard-deletes a station, queueing a remote delete if it was ever pushed.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let existing = Self::fetch_by_id_in(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Station", id))?;

        sqlx::query("DELETE FROM stations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if existing.is_user_defined {
            PendingMutationRepository::record(
                &mut tx,
                id,
                MutationKind::Deleted,
                existing.record_id.as_ref(),
            )
            .await?;
        }
        tx.commit().await?;

        info!(station_id = %id, "Station deleted");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a station by local id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Station>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_by_id_in(&mut conn, id).await
    }

    /// Gets a station by remote record name.
    pub async fn get_by_record_name(&self, record_name: &str) -> DbResult<Option<Station>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_by_record_name_in(&mut conn, record_name).await
    }

    /// Loads the given stations, skipping ids that no longer exist.
    pub async fn get_many(&self, ids: &[&str]) -> DbResult<Vec<Station>> {
        let mut conn = self.pool.acquire().await?;
        let mut stations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(station) = Self::fetch_by_id_in(&mut conn, id).await? {
                stations.push(station);
            }
        }
        Ok(stations)
    }

    /// Lists all stations ordered by name.
    pub async fn list_all(&self) -> DbResult<Vec<Station>> {
        let sql = format!("SELECT {} FROM stations ORDER BY name ASC", STATION_COLUMNS);
        let rows: Vec<StationRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Station::try_from).collect()
    }

    /// Lists stations visible to the user (not soft-deleted).
    pub async fn list_visible(&self) -> DbResult<Vec<Station>> {
        let sql = format!(
            "SELECT {} FROM stations WHERE is_soft_deleted = 0 ORDER BY name ASC",
            STATION_COLUMNS
        );
        let rows: Vec<StationRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Station::try_from).collect()
    }

    /// Counts stations.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stations")
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

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_records_pending_insert() {
        let db = db().await;
        let station = db
            .stations()
            .create(StationFields::new("Radio 1").with_url("https://example.com/r1"))
            .await
            .unwrap();

        assert!(station.is_user_defined);
        assert!(station.record_id.is_none());

        let pending = db.pending_mutations().snapshot().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].station_id, station.id);
        assert_eq!(pending[0].kind, MutationKind::Inserted);

        let loaded = db.stations().get_by_id(&station.id).await.unwrap().unwrap();
        assert_eq!(loaded.fields, station.fields);
    }

    #[tokio::test]
    async fn test_invalid_fields_write_nothing() {
        let db = db().await;
        let err = db.stations().create(StationFields::new("")).await.unwrap_err();

        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(db.stations().count().await.unwrap(), 0);
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at_and_moves_updated_at_forward() {
        let db = db().await;
        let station = db.stations().create(StationFields::new("Old")).await.unwrap();

        let updated = db
            .stations()
            .update(&station.id, StationFields::new("New"))
            .await
            .unwrap();

        assert_eq!(updated.fields.name, "New");
        assert_eq!(updated.created_at, station.created_at);
        assert!(updated.updated_at >= station.updated_at);
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 2);
    }

    #[test]
    fn test_updated_at_never_moves_backwards() {
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(next_updated_at(future), future);
    }

    #[tokio::test]
    async fn test_delete_captures_record_identity() {
        let db = db().await;
        let rid = RecordId::new("R-1", ZoneId::new("RadioZone"));

        let mut tx = db.pool().begin().await.unwrap();
        let station = StationRepository::insert_in(&mut tx, &StationFields::new("x"), true, Some(&rid))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        db.stations().delete(&station.id).await.unwrap();

        assert!(db.stations().get_by_id(&station.id).await.unwrap().is_none());
        let pending = db.pending_mutations().snapshot().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, MutationKind::Deleted);
        assert_eq!(pending[0].record_id, Some(rid));
    }

    #[tokio::test]
    async fn test_public_station_edits_are_local_only() {
        let db = db().await;
        let rid = RecordId::new("P-1", ZoneId::default_zone());

        let mut tx = db.pool().begin().await.unwrap();
        let station = StationRepository::insert_in(&mut tx, &StationFields::new("Pub"), false, Some(&rid))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let hidden = db.stations().set_soft_deleted(&station.id, true).await.unwrap();
        assert!(hidden.fields.is_soft_deleted);
        assert!(db.stations().list_visible().await.unwrap().is_empty());
        assert_eq!(db.pending_mutations().count_pending().await.unwrap(), 0);

        let by_name = db.stations().get_by_record_name("P-1").await.unwrap().unwrap();
        assert_eq!(by_name.id, station.id);
    }

    #[tokio::test]
    async fn test_missing_station_errors() {
        let db = db().await;
        assert!(db.stations().delete("nope").await.unwrap_err().is_not_found());
        assert!(db
            .stations()
            .update("nope", StationFields::new("x"))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(db.stations().get_many(&["nope"]).await.unwrap().is_empty());
    }
}
