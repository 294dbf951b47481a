//! # Remote Store Gateway
//!
//! The sync engine's view of the remote record service. Every call names
//! the database scope it targets.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  zones          list_zones / modify_zones                              │
//! │  subscriptions  list_subscriptions / modify_subscriptions              │
//! │  change feeds   fetch_database_changes / fetch_zone_changes            │
//! │                 one page per call; `more_coming` asks for another page │
//! │                 against the returned token                             │
//! │  records        fetch_records (keyed) / fetch_record_list (bulk)       │
//! │                 modify_records (save + delete in one request)          │
//! │  queries        query, paged with an opaque cursor                     │
//! │                                                                         │
//! │  Whole-request failures come back as Err(RemoteError). Per-item        │
//! │  rejections come back inside the Ok value and never fail the batch.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;

pub use memory::{InjectedFailure, InMemoryRemoteStore, RemoteOp};

use std::collections::BTreeMap;

use airwave_core::subscriptions::Subscription;
use airwave_core::{ChangeToken, DatabaseScope, RecordId, RemoteRecord, ZoneId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{RemoteError, RemoteResult};

// =============================================================================
// Request / Response Types
// =============================================================================

/// One page of the database-level change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseChangesPage {
    pub changed_zones: Vec<ZoneId>,
    pub deleted_zones: Vec<ZoneId>,
    pub token: ChangeToken,
    pub more_coming: bool,
}

/// One page of a zone-level change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneChangesPage {
    pub changed: Vec<RemoteRecord>,
    pub deleted: Vec<RecordId>,
    pub token: ChangeToken,
    pub more_coming: bool,
}

/// A rejected item in an otherwise successful batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemError<T> {
    pub item: T,
    pub error: RemoteError,
}

/// Result of a save/delete batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyOutcome<S, D> {
    pub saved: Vec<S>,
    pub deleted: Vec<D>,
    pub save_errors: Vec<ItemError<S>>,
    pub delete_errors: Vec<ItemError<D>>,
}

impl<S, D> Default for ModifyOutcome<S, D> {
    fn default() -> Self {
        ModifyOutcome {
            saved: Vec::new(),
            deleted: Vec::new(),
            save_errors: Vec::new(),
            delete_errors: Vec::new(),
        }
    }
}

impl<S, D> ModifyOutcome<S, D> {
    pub fn error_count(&self) -> usize {
        self.save_errors.len() + self.delete_errors.len()
    }
}

/// A record query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub record_type: String,
    /// Only records modified strictly after this instant.
    pub modified_after: Option<DateTime<Utc>>,
    pub page_size: usize,
}

/// Opaque continuation for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCursor(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub records: Vec<RemoteRecord>,
    pub cursor: Option<QueryCursor>,
}

// =============================================================================
// Gateway Trait
// =============================================================================

/// Access to a scoped remote record store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_zones(&self, scope: DatabaseScope) -> RemoteResult<Vec<ZoneId>>;

    async fn modify_zones(
        &self,
        scope: DatabaseScope,
        to_create: &[ZoneId],
        to_delete: &[ZoneId],
    ) -> RemoteResult<ModifyOutcome<ZoneId, ZoneId>>;

    async fn list_subscriptions(
        &self,
        scope: DatabaseScope,
    ) -> RemoteResult<BTreeMap<String, Subscription>>;

    async fn modify_subscriptions(
        &self,
        scope: DatabaseScope,
        to_save: &[Subscription],
        to_delete: &[String],
    ) -> RemoteResult<ModifyOutcome<String, String>>;

    async fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        token: Option<&ChangeToken>,
        page_size: usize,
    ) -> RemoteResult<DatabaseChangesPage>;

    async fn fetch_zone_changes(
        &self,
        scope: DatabaseScope,
        zone: &ZoneId,
        token: Option<&ChangeToken>,
        page_size: usize,
    ) -> RemoteResult<ZoneChangesPage>;

    /// Fetches records by identity, with a result per requested id.
    async fn fetch_records(
        &self,
        scope: DatabaseScope,
        ids: &[RecordId],
    ) -> RemoteResult<BTreeMap<RecordId, RemoteResult<RemoteRecord>>>;

    /// Saves and deletes records in one request.
    async fn modify_records(
        &self,
        scope: DatabaseScope,
        to_save: &[RemoteRecord],
        to_delete: &[RecordId],
    ) -> RemoteResult<ModifyOutcome<RemoteRecord, RecordId>>;

    async fn query(
        &self,
        scope: DatabaseScope,
        query: &RecordQuery,
        cursor: Option<&QueryCursor>,
    ) -> RemoteResult<QueryPage>;

    /// Bulk variant of [`fetch_records`](Self::fetch_records): the records
    /// that were found, in request order.
    async fn fetch_record_list(
        &self,
        scope: DatabaseScope,
        ids: &[RecordId],
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let mut keyed = self.fetch_records(scope, ids).await?;
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            match keyed.remove(id) {
                Some(Ok(record)) => records.push(record),
                Some(Err(err)) => warn!(record = %id, error = %err, "Record fetch rejected"),
                None => warn!(record = %id, "Record missing from fetch response"),
            }
        }

        Ok(records)
    }
}
