//! # In-Memory Remote Store
//!
//! A complete [`RemoteStore`] kept in process memory. Used by tests and by
//! hosts running without an account.
//!
//! ## Change Feeds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every write gets the next sequence number and lands in two logs:      │
//! │                                                                         │
//! │    record log  (seq, record id, changed|deleted)   → zone feeds         │
//! │    zone log    (seq, zone id,   changed|deleted)   → database feed      │
//! │                                                                         │
//! │  A token is "<epoch>:<seq>": everything after seq is still unread.     │
//! │  expire_tokens() bumps the epoch, so every outstanding token is        │
//! │  rejected with ChangeTokenExpired.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Injection
//! [`InMemoryRemoteStore::fail_next`] queues a failure for the next call of
//! one operation. `Fail` rejects the request untouched; `AppliedThenFail`
//! performs it and then reports an error, like a response lost in transit.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use airwave_core::subscriptions::Subscription;
use airwave_core::{ChangeToken, DatabaseScope, RecordId, RemoteRecord, ZoneId};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    DatabaseChangesPage, ItemError, ModifyOutcome, QueryCursor, QueryPage, RecordQuery,
    RemoteStore, ZoneChangesPage,
};
use crate::error::{RemoteError, RemoteResult};

/// Gateway calls that failures can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListZones,
    ModifyZones,
    ListSubscriptions,
    ModifySubscriptions,
    FetchDatabaseChanges,
    FetchZoneChanges,
    FetchRecords,
    ModifyRecords,
    Query,
}

#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// Reject the request without applying it.
    Fail(RemoteError),
    /// Apply the request, then report an error.
    AppliedThenFail(RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Changed,
    Deleted,
}

#[derive(Debug, Clone)]
struct LogEntry<T> {
    seq: u64,
    id: T,
    change: Change,
}

#[derive(Debug, Default)]
struct ScopeState {
    zones: BTreeSet<ZoneId>,
    records: BTreeMap<RecordId, RemoteRecord>,
    record_log: Vec<LogEntry<RecordId>>,
    zone_log: Vec<LogEntry<ZoneId>>,
    subscriptions: BTreeMap<String, Subscription>,
}

#[derive(Debug)]
struct State {
    seq: u64,
    epoch: u64,
    scopes: HashMap<DatabaseScope, ScopeState>,
    failures: HashMap<RemoteOp, VecDeque<InjectedFailure>>,
    calls: HashMap<RemoteOp, usize>,
}

impl State {
    fn new() -> Self {
        let mut scopes = HashMap::new();
        for scope in DatabaseScope::ALL {
            let mut state = ScopeState::default();
            state.zones.insert(ZoneId::default_zone());
            scopes.insert(scope, state);
        }

        State {
            seq: 0,
            epoch: 1,
            scopes,
            failures: HashMap::new(),
            calls: HashMap::new(),
        }
    }

    /// Counts the call and pops its queued failure, if any.
    fn begin(&mut self, op: RemoteOp) -> RemoteResult<Option<InjectedFailure>> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(InjectedFailure::Fail(err)) => {
                debug!(?op, error = %err, "Injected failure");
                Err(err)
            }
            other => Ok(other),
        }
    }

    fn scope(&mut self, scope: DatabaseScope) -> &mut ScopeState {
        self.scopes.entry(scope).or_default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn token(&self, seq: u64) -> ChangeToken {
        ChangeToken::from_bytes(format!("{}:{}", self.epoch, seq).into_bytes())
    }

    fn read_token(&self, token: Option<&ChangeToken>) -> RemoteResult<u64> {
        let Some(token) = token else {
            return Ok(0);
        };

        let text = std::str::from_utf8(token.as_bytes()).map_err(|_| RemoteError::ChangeTokenExpired)?;
        let (epoch, seq) = text.split_once(':').ok_or(RemoteError::ChangeTokenExpired)?;
        match (epoch.parse::<u64>(), seq.parse::<u64>()) {
            (Ok(epoch), Ok(seq)) if epoch == self.epoch => Ok(seq),
            _ => Err(RemoteError::ChangeTokenExpired),
        }
    }

    fn create_zone(&mut self, scope: DatabaseScope, zone: &ZoneId) {
        let seq = self.next_seq();
        let state = self.scope(scope);
        state.zones.insert(zone.clone());
        state.zone_log.push(LogEntry {
            seq,
            id: zone.clone(),
            change: Change::Changed,
        });
    }

    fn delete_zone(&mut self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()> {
        if zone.is_default() {
            return Err(RemoteError::Other("the default zone cannot be deleted".into()));
        }
        if !self.scope(scope).zones.contains(zone) {
            return Err(RemoteError::ZoneNotFound(zone.clone()));
        }

        let seq = self.next_seq();
        let state = self.scope(scope);
        state.zones.remove(zone);
        state.records.retain(|id, _| &id.zone_id != zone);
        state.record_log.retain(|entry| &entry.id.zone_id != zone);
        state.zone_log.push(LogEntry {
            seq,
            id: zone.clone(),
            change: Change::Deleted,
        });
        Ok(())
    }

    fn save_record(&mut self, scope: DatabaseScope, record: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        let zone = record.record_id.zone_id.clone();
        if !self.scope(scope).zones.contains(&zone) {
            return Err(RemoteError::ZoneNotFound(zone));
        }

        let seq = self.next_seq();
        let mut stored = record.clone();
        stored.modified_at = Some(Utc::now());

        let state = self.scope(scope);
        state.records.insert(stored.record_id.clone(), stored.clone());
        state.record_log.push(LogEntry {
            seq,
            id: stored.record_id.clone(),
            change: Change::Changed,
        });
        state.zone_log.push(LogEntry {
            seq,
            id: zone,
            change: Change::Changed,
        });
        Ok(stored)
    }

    fn delete_record(&mut self, scope: DatabaseScope, id: &RecordId) -> bool {
        if !self.scope(scope).records.contains_key(id) {
            return false;
        }

        let seq = self.next_seq();
        let state = self.scope(scope);
        state.records.remove(id);
        state.record_log.push(LogEntry {
            seq,
            id: id.clone(),
            change: Change::Deleted,
        });
        state.zone_log.push(LogEntry {
            seq,
            id: id.zone_id.clone(),
            change: Change::Changed,
        });
        true
    }
}

fn finish<T>(failure: Option<InjectedFailure>, value: T) -> RemoteResult<T> {
    match failure {
        Some(InjectedFailure::AppliedThenFail(err)) => {
            debug!(error = %err, "Injected failure after apply");
            Err(err)
        }
        _ => Ok(value),
    }
}

/// Process-local remote record store.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    state: Mutex<State>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    /// Both scopes start with only their default zone.
    pub fn new() -> Self {
        InMemoryRemoteStore {
            state: Mutex::new(State::new()),
        }
    }

    // =========================================================================
    // Test and Host Controls
    // =========================================================================

    /// Queues a failure for the next call of `op`.
    pub async fn fail_next(&self, op: RemoteOp, failure: InjectedFailure) {
        self.state
            .lock()
            .await
            .failures
            .entry(op)
            .or_default()
            .push_back(failure);
    }

    pub async fn call_count(&self, op: RemoteOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Invalidates every token handed out so far.
    pub async fn expire_tokens(&self) {
        self.state.lock().await.epoch += 1;
    }

    /// Creates a zone as another device would.
    pub async fn seed_zone(&self, scope: DatabaseScope, zone: ZoneId) {
        self.state.lock().await.create_zone(scope, &zone);
    }

    /// Deletes a zone and its records as another device would.
    pub async fn remove_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()> {
        self.state.lock().await.delete_zone(scope, zone)
    }

    /// Saves a record as another device would.
    pub async fn seed_record(
        &self,
        scope: DatabaseScope,
        record: RemoteRecord,
    ) -> RemoteResult<RemoteRecord> {
        self.state.lock().await.save_record(scope, &record)
    }

    /// Deletes a record as another device would.
    pub async fn remove_record(&self, scope: DatabaseScope, id: &RecordId) -> bool {
        self.state.lock().await.delete_record(scope, id)
    }

    pub async fn seed_subscription(&self, scope: DatabaseScope, subscription: Subscription) {
        self.state
            .lock()
            .await
            .scope(scope)
            .subscriptions
            .insert(subscription.subscription_id.clone(), subscription);
    }

    pub async fn records(&self, scope: DatabaseScope) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .await
            .scope(scope)
            .records
            .values()
            .cloned()
            .collect()
    }

    pub async fn record(&self, scope: DatabaseScope, id: &RecordId) -> Option<RemoteRecord> {
        self.state.lock().await.scope(scope).records.get(id).cloned()
    }

    pub async fn zones(&self, scope: DatabaseScope) -> Vec<ZoneId> {
        self.state
            .lock()
            .await
            .scope(scope)
            .zones
            .iter()
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self, scope: DatabaseScope) -> BTreeMap<String, Subscription> {
        self.state.lock().await.scope(scope).subscriptions.clone()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list_zones(&self, scope: DatabaseScope) -> RemoteResult<Vec<ZoneId>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::ListZones)?;
        let zones = state.scope(scope).zones.iter().cloned().collect();
        finish(failure, zones)
    }

    async fn modify_zones(
        &self,
        scope: DatabaseScope,
        to_create: &[ZoneId],
        to_delete: &[ZoneId],
    ) -> RemoteResult<ModifyOutcome<ZoneId, ZoneId>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::ModifyZones)?;
        let mut outcome = ModifyOutcome::default();

        for zone in to_create {
            state.create_zone(scope, zone);
            outcome.saved.push(zone.clone());
        }
        for zone in to_delete {
            match state.delete_zone(scope, zone) {
                Ok(()) => outcome.deleted.push(zone.clone()),
                Err(error) => outcome.delete_errors.push(ItemError {
                    item: zone.clone(),
                    error,
                }),
            }
        }

        finish(failure, outcome)
    }

    async fn list_subscriptions(
        &self,
        scope: DatabaseScope,
    ) -> RemoteResult<BTreeMap<String, Subscription>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::ListSubscriptions)?;
        let subscriptions = state.scope(scope).subscriptions.clone();
        finish(failure, subscriptions)
    }

    async fn modify_subscriptions(
        &self,
        scope: DatabaseScope,
        to_save: &[Subscription],
        to_delete: &[String],
    ) -> RemoteResult<ModifyOutcome<String, String>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::ModifySubscriptions)?;
        let mut outcome = ModifyOutcome::default();
        let scope_state = state.scope(scope);

        for subscription in to_save {
            if let Some(zone) = &subscription.zone_id {
                if !scope_state.zones.contains(zone) {
                    outcome.save_errors.push(ItemError {
                        item: subscription.subscription_id.clone(),
                        error: RemoteError::ZoneNotFound(zone.clone()),
                    });
                    continue;
                }
            }
            // Same id replaces, never duplicates.
            scope_state
                .subscriptions
                .insert(subscription.subscription_id.clone(), subscription.clone());
            outcome.saved.push(subscription.subscription_id.clone());
        }
        for id in to_delete {
            if scope_state.subscriptions.remove(id).is_some() {
                outcome.deleted.push(id.clone());
            } else {
                outcome.delete_errors.push(ItemError {
                    item: id.clone(),
                    error: RemoteError::Other(format!("unknown subscription {}", id)),
                });
            }
        }

        finish(failure, outcome)
    }

    async fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        token: Option<&ChangeToken>,
        page_size: usize,
    ) -> RemoteResult<DatabaseChangesPage> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::FetchDatabaseChanges)?;
        let since = state.read_token(token)?;
        let current = state.seq;

        let pending: Vec<LogEntry<ZoneId>> = state
            .scope(scope)
            .zone_log
            .iter()
            .filter(|entry| entry.seq > since)
            .cloned()
            .collect();
        let page_len = pending.len().min(page_size.max(1));
        let page = &pending[..page_len];

        let mut changed_zones = Vec::new();
        let mut deleted_zones = Vec::new();
        for entry in page {
            let list = match entry.change {
                Change::Changed => &mut changed_zones,
                Change::Deleted => &mut deleted_zones,
            };
            if !list.contains(&entry.id) {
                list.push(entry.id.clone());
            }
        }

        let last = page.last().map(|entry| entry.seq).unwrap_or(current);
        let result = DatabaseChangesPage {
            changed_zones,
            deleted_zones,
            token: state.token(last),
            more_coming: pending.len() > page_len,
        };
        finish(failure, result)
    }

    async fn fetch_zone_changes(
        &self,
        scope: DatabaseScope,
        zone: &ZoneId,
        token: Option<&ChangeToken>,
        page_size: usize,
    ) -> RemoteResult<ZoneChangesPage> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::FetchZoneChanges)?;
        let since = state.read_token(token)?;
        let current = state.seq;

        let scope_state = state.scope(scope);
        if !scope_state.zones.contains(zone) {
            return Err(RemoteError::ZoneNotFound(zone.clone()));
        }

        let pending: Vec<&LogEntry<RecordId>> = scope_state
            .record_log
            .iter()
            .filter(|entry| entry.seq > since && &entry.id.zone_id == zone)
            .collect();
        let page_len = pending.len().min(page_size.max(1));
        let page = &pending[..page_len];

        // Last entry per record inside the page decides its fate.
        let mut latest: BTreeMap<&RecordId, Change> = BTreeMap::new();
        for entry in page {
            latest.insert(&entry.id, entry.change);
        }

        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for (id, change) in latest {
            match change {
                Change::Changed => {
                    if let Some(record) = scope_state.records.get(id) {
                        changed.push(record.clone());
                    }
                }
                Change::Deleted => deleted.push(id.clone()),
            }
        }

        let last = page.last().map(|entry| entry.seq).unwrap_or(current);
        let more_coming = pending.len() > page_len;
        let result = ZoneChangesPage {
            changed,
            deleted,
            token: state.token(last),
            more_coming,
        };
        finish(failure, result)
    }

    async fn fetch_records(
        &self,
        scope: DatabaseScope,
        ids: &[RecordId],
    ) -> RemoteResult<BTreeMap<RecordId, RemoteResult<RemoteRecord>>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::FetchRecords)?;
        let records = &state.scope(scope).records;

        let result = ids
            .iter()
            .map(|id| {
                let found = records
                    .get(id)
                    .cloned()
                    .ok_or_else(|| RemoteError::RecordNotFound(id.clone()));
                (id.clone(), found)
            })
            .collect();
        finish(failure, result)
    }

    async fn modify_records(
        &self,
        scope: DatabaseScope,
        to_save: &[RemoteRecord],
        to_delete: &[RecordId],
    ) -> RemoteResult<ModifyOutcome<RemoteRecord, RecordId>> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::ModifyRecords)?;
        let mut outcome = ModifyOutcome::default();

        for record in to_save {
            match state.save_record(scope, record) {
                Ok(saved) => outcome.saved.push(saved),
                Err(error) => outcome.save_errors.push(ItemError {
                    item: record.clone(),
                    error,
                }),
            }
        }
        for id in to_delete {
            // Deleting an absent record is reported as done.
            state.delete_record(scope, id);
            outcome.deleted.push(id.clone());
        }

        debug!(
            scope = %scope,
            saved = outcome.saved.len(),
            deleted = outcome.deleted.len(),
            rejected = outcome.error_count(),
            "Records modified"
        );
        finish(failure, outcome)
    }

    async fn query(
        &self,
        scope: DatabaseScope,
        query: &RecordQuery,
        cursor: Option<&QueryCursor>,
    ) -> RemoteResult<QueryPage> {
        let mut state = self.state.lock().await;
        let failure = state.begin(RemoteOp::Query)?;

        let offset = match cursor {
            Some(cursor) => std::str::from_utf8(&cursor.0)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| RemoteError::Other("malformed query cursor".into()))?,
            None => 0,
        };

        let mut matching: Vec<&RemoteRecord> = state
            .scope(scope)
            .records
            .values()
            .filter(|record| record.record_type == query.record_type)
            .filter(|record| match (query.modified_after, record.modified_at) {
                (Some(after), Some(modified)) => modified > after,
                _ => true,
            })
            .collect();
        matching.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });

        let page_size = query.page_size.max(1);
        let end = (offset + page_size).min(matching.len());
        let records = matching
            .get(offset..end)
            .map(|slice| slice.iter().map(|r| (*r).clone()).collect())
            .unwrap_or_default();
        let cursor = (end < matching.len()).then(|| QueryCursor(end.to_string().into_bytes()));

        finish(failure, QueryPage { records, cursor })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
