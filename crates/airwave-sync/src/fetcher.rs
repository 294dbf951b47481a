//! # Change Fetcher
//!
//! Walks the database-level and zone-level change feeds of one scope and
//! flattens every page into a single result.
//!
//! ## Token Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  fetch_database_changes(token)  → zones changed / deleted + new token  │
//! │  fetch_zone_changes(zones)      → records changed / deleted + tokens   │
//! │                                                                         │
//! │  The fetcher only RETURNS tokens. They are written by the apply stage  │
//! │  in the same transaction as the records they cover.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An expired token is dropped and the feed is re-read from the start once.
//!
//! ## Zone Lifecycle In One Feed
//! ```text
//! changed ... deleted            → deleted only: purge
//! deleted ... changed            → both: purge, then read from the start
//! both on the same page          → both; if the zone is gone by the time
//!                                  it is read, it lands in `vanished_zones`
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use airwave_core::{ChangeToken, DatabaseScope, RecordId, RemoteRecord, ZoneId};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::remote::{ItemError, RemoteStore};

/// Zones touched since the database token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseChanges {
    /// Zones to fetch. A zone also listed in `deleted_zones` was re-created.
    pub changed_zones: Vec<ZoneId>,
    /// Zones to purge locally.
    pub deleted_zones: Vec<ZoneId>,
    pub token: Option<ChangeToken>,
}

impl DatabaseChanges {
    /// Deleted and re-created since the token; read without a stored token.
    pub fn is_recreated(&self, zone: &ZoneId) -> bool {
        self.changed_zones.contains(zone) && self.deleted_zones.contains(zone)
    }
}

/// Records touched in a set of zones.
#[derive(Debug, Clone, Default)]
pub struct ZoneChanges {
    pub changed: Vec<RemoteRecord>,
    pub deleted: Vec<RecordId>,
    /// New token per successfully fetched zone.
    pub tokens: BTreeMap<ZoneId, ChangeToken>,
    /// Zones whose fetch failed; their records are missing from this result.
    pub failed_zones: Vec<ItemError<ZoneId>>,
    /// Zones that no longer exist on the server.
    pub vanished_zones: Vec<ZoneId>,
}

impl ZoneChanges {
    pub fn is_complete(&self) -> bool {
        self.failed_zones.is_empty()
    }

    /// First zone failure, if any.
    pub fn first_error(&self) -> Option<&RemoteError> {
        self.failed_zones.first().map(|failed| &failed.error)
    }
}

/// Reads change feeds for one scope.
#[derive(Clone)]
pub struct ChangeFetcher {
    remote: Arc<dyn RemoteStore>,
    scope: DatabaseScope,
    page_size: usize,
}

impl ChangeFetcher {
    pub fn new(remote: Arc<dyn RemoteStore>, scope: DatabaseScope, page_size: usize) -> Self {
        ChangeFetcher {
            remote,
            scope,
            page_size: page_size.max(1),
        }
    }

    pub fn scope(&self) -> DatabaseScope {
        self.scope
    }

    /// Reads the database feed to its end.
    pub async fn fetch_database_changes(
        &self,
        token: Option<ChangeToken>,
    ) -> RemoteResult<DatabaseChanges> {
        match self.walk_database_feed(token.clone()).await {
            Err(RemoteError::ChangeTokenExpired) if token.is_some() => {
                warn!(scope = %self.scope, "Database change token expired; refetching from start");
                self.walk_database_feed(None).await
            }
            other => other,
        }
    }

    async fn walk_database_feed(&self, mut token: Option<ChangeToken>) -> RemoteResult<DatabaseChanges> {
        let mut changed: Vec<ZoneId> = Vec::new();
        let mut deleted: Vec<ZoneId> = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .remote
                .fetch_database_changes(self.scope, token.as_ref(), self.page_size)
                .await?;
            pages += 1;

            // A delete cancels earlier changes; a change on the same or a
            // later page means the zone exists again.
            for zone in page.deleted_zones {
                changed.retain(|z| z != &zone);
                if !deleted.contains(&zone) {
                    deleted.push(zone);
                }
            }
            for zone in page.changed_zones {
                if !changed.contains(&zone) {
                    changed.push(zone);
                }
            }

            token = Some(page.token);
            if !page.more_coming {
                break;
            }
        }

        debug!(
            scope = %self.scope,
            pages,
            changed = changed.len(),
            deleted = deleted.len(),
            "Database changes fetched"
        );

        Ok(DatabaseChanges {
            changed_zones: changed,
            deleted_zones: deleted,
            token,
        })
    }

    /// Reads the feeds of the given zones concurrently.
    ///
    /// A zone that fails is reported in `failed_zones` and does not fail the
    /// others.
    pub async fn fetch_zone_changes(&self, zones: &[(ZoneId, Option<ChangeToken>)]) -> ZoneChanges {
        let fetches = zones
            .iter()
            .map(|(zone, token)| self.fetch_one_zone(zone.clone(), token.clone()));
        let results = join_all(fetches).await;

        let mut latest: BTreeMap<RecordId, Option<RemoteRecord>> = BTreeMap::new();
        let mut changes = ZoneChanges::default();

        for (zone, result) in results {
            match result {
                Ok(feed) => {
                    for (id, record) in feed.records {
                        latest.insert(id, record);
                    }
                    if let Some(token) = feed.token {
                        changes.tokens.insert(zone, token);
                    }
                }
                Err(RemoteError::ZoneNotFound(_)) => {
                    info!(scope = %self.scope, zone = %zone, "Zone gone before it could be read");
                    changes.vanished_zones.push(zone);
                }
                Err(error) => {
                    warn!(scope = %self.scope, zone = %zone, error = %error, "Zone fetch failed");
                    changes.failed_zones.push(ItemError { item: zone, error });
                }
            }
        }

        for (id, record) in latest {
            match record {
                Some(record) => changes.changed.push(record),
                None => changes.deleted.push(id),
            }
        }

        info!(
            scope = %self.scope,
            zones = zones.len(),
            changed = changes.changed.len(),
            deleted = changes.deleted.len(),
            failed = changes.failed_zones.len(),
            "Zone changes fetched"
        );
        changes
    }

    async fn fetch_one_zone(
        &self,
        zone: ZoneId,
        token: Option<ChangeToken>,
    ) -> (ZoneId, RemoteResult<ZoneFeed>) {
        let result = match self.walk_zone_feed(&zone, token.clone()).await {
            Err(RemoteError::ChangeTokenExpired) if token.is_some() => {
                warn!(scope = %self.scope, zone = %zone, "Zone change token expired; refetching from start");
                self.walk_zone_feed(&zone, None).await
            }
            other => other,
        };
        (zone, result)
    }

    async fn walk_zone_feed(&self, zone: &ZoneId, mut token: Option<ChangeToken>) -> RemoteResult<ZoneFeed> {
        let mut feed = ZoneFeed::default();

        loop {
            let page = self
                .remote
                .fetch_zone_changes(self.scope, zone, token.as_ref(), self.page_size)
                .await?;

            // Later pages override earlier ones.
            for record in page.changed {
                feed.records.insert(record.record_id.clone(), Some(record));
            }
            for id in page.deleted {
                feed.records.insert(id, None);
            }

            token = Some(page.token);
            if !page.more_coming {
                break;
            }
            debug!(scope = %self.scope, zone = %zone, "More zone changes coming");
        }

        feed.token = token;
        Ok(feed)
    }
}

#[derive(Debug, Default)]
struct ZoneFeed {
    /// `None` marks a deletion.
    records: BTreeMap<RecordId, Option<RemoteRecord>>,
    token: Option<ChangeToken>,
}
