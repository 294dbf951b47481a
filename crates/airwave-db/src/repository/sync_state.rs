//! # Sync State Repository
//!
//! Key/value store for the sync engine's persisted cursors.
//!
//! ## Keys
//! ```text
//! ┌──────────────────────────────────────┬──────────────────────────────────┐
//! │ key                                  │ value (versioned blob)           │
//! ├──────────────────────────────────────┼──────────────────────────────────┤
//! │ token.database.private               │ ChangeToken                      │
//! │ token.zone.private.RadioZone         │ ChangeToken                      │
//! │ flag.initial_private_sync            │ bool                             │
//! │ timestamp.last_public_sync           │ DateTime<Utc>                    │
//! └──────────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Reads go straight to the pool. Writes made by a sync cycle go through
//! [`SyncStateRepository::apply_in`] inside the remote-apply transaction so a
//! token never lands before the records it covers.

use std::fmt;

use airwave_core::blob;
use airwave_core::{ChangeToken, DatabaseScope, ZoneId};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// A persisted sync-state entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncStateKey {
    /// Database-level change token for a scope.
    DatabaseToken(DatabaseScope),
    /// Zone-level change token.
    ZoneToken(DatabaseScope, String),
    /// Set once the first full private fetch has been applied.
    InitialPrivateSyncPerformed,
    /// Lower bound for the next public query.
    LastPublicSync,
}

impl SyncStateKey {
    pub fn zone_token(scope: DatabaseScope, zone: &ZoneId) -> Self {
        SyncStateKey::ZoneToken(scope, zone.zone_name.clone())
    }

    pub fn as_key(&self) -> String {
        match self {
            SyncStateKey::DatabaseToken(scope) => format!("token.database.{}", scope),
            SyncStateKey::ZoneToken(scope, zone) => format!("token.zone.{}.{}", scope, zone),
            SyncStateKey::InitialPrivateSyncPerformed => "flag.initial_private_sync".to_string(),
            SyncStateKey::LastPublicSync => "timestamp.last_public_sync".to_string(),
        }
    }
}

impl fmt::Display for SyncStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// One write to the sync-state store.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    SetToken(SyncStateKey, ChangeToken),
    SetFlag(SyncStateKey, bool),
    SetTimestamp(SyncStateKey, DateTime<Utc>),
    Clear(SyncStateKey),
}

impl StateUpdate {
    pub fn key(&self) -> &SyncStateKey {
        match self {
            StateUpdate::SetToken(key, _)
            | StateUpdate::SetFlag(key, _)
            | StateUpdate::SetTimestamp(key, _)
            | StateUpdate::Clear(key) => key,
        }
    }
}

/// Repository for sync-state reads and out-of-cycle writes.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    /// Creates a new SyncStateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    async fn get_raw(&self, key: &SyncStateKey) -> DbResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
                .bind(key.as_key())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    pub async fn token(&self, key: &SyncStateKey) -> DbResult<Option<ChangeToken>> {
        Ok(self
            .get_raw(key)
            .await?
            .map(|bytes| blob::decode_token(&bytes))
            .transpose()?)
    }

    pub async fn flag(&self, key: &SyncStateKey) -> DbResult<bool> {
        Ok(self
            .get_raw(key)
            .await?
            .map(|bytes| blob::decode_flag(&bytes))
            .transpose()?
            .unwrap_or(false))
    }

    pub async fn timestamp(&self, key: &SyncStateKey) -> DbResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_raw(key)
            .await?
            .map(|bytes| blob::decode_timestamp(&bytes))
            .transpose()?)
    }

    /// Database-level token for a scope.
    pub async fn database_token(&self, scope: DatabaseScope) -> DbResult<Option<ChangeToken>> {
        self.token(&SyncStateKey::DatabaseToken(scope)).await
    }

    /// Zone-level token.
    pub async fn zone_token(
        &self,
        scope: DatabaseScope,
        zone: &ZoneId,
    ) -> DbResult<Option<ChangeToken>> {
        self.token(&SyncStateKey::zone_token(scope, zone)).await
    }

    pub async fn initial_private_sync_performed(&self) -> DbResult<bool> {
        self.flag(&SyncStateKey::InitialPrivateSyncPerformed).await
    }

    pub async fn last_public_sync(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.timestamp(&SyncStateKey::LastPublicSync).await
    }

    /// Applies updates outside a sync cycle (host resets, tests).
    pub async fn apply(&self, updates: &[StateUpdate]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::apply_in(&mut tx, updates).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Forgets every token for a scope, forcing the next fetch to start over.
    pub async fn reset_tokens(&self, scope: DatabaseScope) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_state WHERE key = ?1 OR key LIKE ?2")
            .bind(SyncStateKey::DatabaseToken(scope).as_key())
            .bind(format!("token.zone.{}.%", scope))
            .execute(&self.pool)
            .await?;

        debug!(scope = %scope, removed = result.rows_affected(), "Reset change tokens");
        Ok(result.rows_affected())
    }

    /// Applies updates on an open transaction's connection.
    pub(crate) async fn apply_in(
        conn: &mut SqliteConnection,
        updates: &[StateUpdate],
    ) -> DbResult<()> {
        for update in updates {
            let value = match update {
                StateUpdate::SetToken(_, token) => Some(blob::encode_token(token)?),
                StateUpdate::SetFlag(_, flag) => Some(blob::encode_flag(*flag)?),
                StateUpdate::SetTimestamp(_, ts) => Some(blob::encode_timestamp(ts)?),
                StateUpdate::Clear(_) => None,
            };

            let key = update.key().as_key();
            match value {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                        ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&key)
                    .bind(value)
                    .bind(Utc::now())
                    .execute(&mut *conn)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM sync_state WHERE key = ?1")
                        .bind(&key)
                        .execute(&mut *conn)
                        .await?;
                }
            }

            debug!(key = %key, "Sync state updated");
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let state = db.sync_state();

        assert!(state.database_token(DatabaseScope::Private).await.unwrap().is_none());
        assert!(!state.initial_private_sync_performed().await.unwrap());
        assert!(state.last_public_sync().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_and_clear() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let state = db.sync_state();
        let zone = ZoneId::new("RadioZone");
        let now = Utc::now();

        state
            .apply(&[
                StateUpdate::SetToken(
                    SyncStateKey::DatabaseToken(DatabaseScope::Private),
                    ChangeToken::from_bytes(vec![1]),
                ),
                StateUpdate::SetToken(
                    SyncStateKey::zone_token(DatabaseScope::Private, &zone),
                    ChangeToken::from_bytes(vec![2]),
                ),
                StateUpdate::SetFlag(SyncStateKey::InitialPrivateSyncPerformed, true),
                StateUpdate::SetTimestamp(SyncStateKey::LastPublicSync, now),
            ])
            .await
            .unwrap();

        assert_eq!(
            state.zone_token(DatabaseScope::Private, &zone).await.unwrap(),
            Some(ChangeToken::from_bytes(vec![2]))
        );
        assert!(state.initial_private_sync_performed().await.unwrap());
        assert_eq!(state.last_public_sync().await.unwrap(), Some(now));

        assert_eq!(state.reset_tokens(DatabaseScope::Private).await.unwrap(), 2);
        assert!(state.database_token(DatabaseScope::Private).await.unwrap().is_none());
        // Flags survive a token reset.
        assert!(state.initial_private_sync_performed().await.unwrap());

        state
            .apply(&[StateUpdate::Clear(SyncStateKey::InitialPrivateSyncPerformed)])
            .await
            .unwrap();
        assert!(!state.initial_private_sync_performed().await.unwrap());
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            SyncStateKey::zone_token(DatabaseScope::Private, &ZoneId::new("RadioZone")).as_key(),
            "token.zone.private.RadioZone"
        );
        assert_eq!(
            SyncStateKey::DatabaseToken(DatabaseScope::Public).to_string(),
            "token.database.public"
        );
    }
}
