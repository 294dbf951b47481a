//! # Push Notifications
//!
//! A notification names one record in one scope. Handling it skips the full
//! pipeline: the record is fetched and applied, or deleted locally.
//!
//! ## Payload
//! ```json
//! {
//!   "scope": "private",
//!   "reason": "updated",
//!   "record": { "record_name": "8F0C…", "zone_name": "RadioZone" },
//!   "subscription_id": "private-Station-changes"
//! }
//! ```
//!
//! `owner_name` is optional and defaults to the current user. Anything that
//! does not parse abandons that one notification and nothing else.

use airwave_core::{DatabaseScope, RecordId, RemoteRecord, ZoneId, CURRENT_USER_OWNER};
use airwave_db::LocalWriteSet;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::executor::{OperationGraph, Priority, Slot};
use crate::pipeline::{decode_records, SyncContext};
use crate::status::SyncPhase;

pub const FETCH: &str = "notification.fetch";
pub const APPLY: &str = "notification.apply";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationReason {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Deserialize)]
struct RecordRef {
    record_name: String,
    zone_name: String,
    #[serde(default)]
    owner_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    scope: DatabaseScope,
    reason: NotificationReason,
    record: RecordRef,
    #[serde(default)]
    subscription_id: Option<String>,
}

/// A parsed push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub scope: DatabaseScope,
    pub reason: NotificationReason,
    pub record_id: RecordId,
    pub subscription_id: Option<String>,
}

impl Notification {
    pub fn parse(payload: &str) -> SyncResult<Self> {
        let raw: NotificationPayload = serde_json::from_str(payload)
            .map_err(|err| SyncError::InvalidNotification(err.to_string()))?;

        if raw.record.record_name.is_empty() || raw.record.zone_name.is_empty() {
            return Err(SyncError::InvalidNotification(
                "record and zone names must not be empty".into(),
            ));
        }

        let owner = raw
            .record
            .owner_name
            .unwrap_or_else(|| CURRENT_USER_OWNER.to_string());
        let zone_id = ZoneId::with_owner(raw.record.zone_name, owner);

        Ok(Notification {
            scope: raw.scope,
            reason: raw.reason,
            record_id: RecordId::new(raw.record.record_name, zone_id),
            subscription_id: raw.subscription_id,
        })
    }

    fn fetch_phase(&self) -> SyncPhase {
        match self.scope {
            DatabaseScope::Public => SyncPhase::FetchingPublicChanges,
            DatabaseScope::Private => SyncPhase::FetchingChanges,
        }
    }
}

/// Builds the graph handling one notification.
pub fn build_notification_graph(ctx: &SyncContext, notification: Notification) -> OperationGraph {
    let mut graph = OperationGraph::new(format!("notification-{}", notification.scope));
    graph.keep_alive("push notification");
    let priority = Priority::UserInitiated;

    match notification.reason {
        NotificationReason::Deleted => {
            let ctx = ctx.clone();
            graph.add(APPLY, priority, &[], move || async move {
                ctx.status.enter(notification.scope, notification.fetch_phase()).await;
                let mut set = LocalWriteSet::new(notification.scope);
                set.deletes.push(notification.record_id.clone());

                // Unknown identities are a no-op.
                let summary = ctx.db.remote_apply().apply(&set).await?;
                info!(
                    scope = %notification.scope,
                    record = %notification.record_id,
                    deleted = summary.deleted,
                    "Notification delete applied"
                );
                Ok(())
            });
        }
        NotificationReason::Created | NotificationReason::Updated => {
            let fetched: Slot<RemoteRecord> = Slot::new();

            let fetch = {
                let ctx = ctx.clone();
                let fetched = fetched.clone();
                let notification = notification.clone();
                graph.add(FETCH, priority, &[], move || async move {
                    ctx.status.enter(notification.scope, notification.fetch_phase()).await;
                    let mut found = ctx
                        .remote
                        .fetch_records(notification.scope, std::slice::from_ref(&notification.record_id))
                        .await?;

                    match found.remove(&notification.record_id) {
                        Some(Ok(record)) => {
                            fetched.put(record).await;
                            Ok(())
                        }
                        // Gone again before we got to it; the next cycle sees the delete.
                        Some(Err(RemoteError::RecordNotFound(_))) | None => {
                            debug!(record = %notification.record_id, "Notified record no longer exists");
                            Ok(())
                        }
                        Some(Err(err)) => Err(err.into()),
                    }
                })
            };

            let ctx = ctx.clone();
            graph.add(APPLY, priority, &[fetch], move || async move {
                let Some(record) = fetched.take().await else {
                    return Ok(());
                };
                if notification.scope == DatabaseScope::Public {
                    ctx.status
                        .enter(DatabaseScope::Public, SyncPhase::ApplyingPublicChanges)
                        .await;
                }

                // A pending local edit wins; it is pushed on the next cycle.
                if let Some(local) = ctx
                    .db
                    .stations()
                    .get_by_record_name(&notification.record_id.record_name)
                    .await?
                {
                    if ctx.db.pending_mutations().has_pending(&local.id).await? {
                        info!(station_id = %local.id, "Local edit pending; notification change not applied");
                        return Ok(());
                    }
                }

                let mut set = LocalWriteSet::new(notification.scope);
                set.upserts = decode_records(std::slice::from_ref(&record));
                let summary = ctx.db.remote_apply().apply(&set).await?;
                info!(
                    scope = %notification.scope,
                    record = %notification.record_id,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    "Notification change applied"
                );
                Ok(())
            });
        }
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::pipeline::test_support::context;
    use crate::remote::InMemoryRemoteStore;
    use airwave_core::codec::encode_station;
    use airwave_core::StationFields;
    use std::sync::Arc;

    fn payload(scope: &str, reason: &str, name: &str) -> String {
        format!(
            r#"{{"scope":"{}","reason":"{}","record":{{"record_name":"{}","zone_name":"RadioZone"}}}}"#,
            scope, reason, name
        )
    }

    #[test]
    fn test_parse() {
        let n = Notification::parse(&payload("private", "updated", "R1")).unwrap();
        assert_eq!(n.scope, DatabaseScope::Private);
        assert_eq!(n.reason, NotificationReason::Updated);
        assert_eq!(n.record_id, RecordId::new("R1", ZoneId::new("RadioZone")));
        assert!(n.subscription_id.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in [
            "not json",
            r#"{"scope":"shared","reason":"updated","record":{"record_name":"a","zone_name":"z"}}"#,
            r#"{"scope":"private","reason":"moved","record":{"record_name":"a","zone_name":"z"}}"#,
            r#"{"scope":"private","reason":"deleted"}"#,
        ] {
            assert!(matches!(
                Notification::parse(bad),
                Err(SyncError::InvalidNotification(_))
            ));
        }
        assert!(Notification::parse(&payload("private", "created", "")).is_err());
    }

    #[tokio::test]
    async fn test_delete_of_unknown_record_is_noop() {
        let ctx = context(Arc::new(InMemoryRemoteStore::new())).await;
        let notification = Notification::parse(&payload("private", "deleted", "missing")).unwrap();

        let report = Executor::new(1)
            .run(build_notification_graph(&ctx, notification))
            .await;
        assert!(report.all_succeeded(), "{:?}", report.first_error());
    }

    #[tokio::test]
    async fn test_update_is_fetched_and_applied() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.seed_zone(DatabaseScope::Private, ZoneId::new("RadioZone")).await;
        remote
            .seed_record(
                DatabaseScope::Private,
                encode_station(
                    &StationFields::new("Pushed FM"),
                    RecordId::new("R1", ZoneId::new("RadioZone")),
                ),
            )
            .await
            .unwrap();
        let ctx = context(remote).await;
        let notification = Notification::parse(&payload("private", "created", "R1")).unwrap();

        let report = Executor::new(1)
            .run(build_notification_graph(&ctx, notification))
            .await;
        assert!(report.all_succeeded(), "{:?}", report.first_error());

        let station = ctx.db.stations().get_by_record_name("R1").await.unwrap().unwrap();
        assert_eq!(station.fields.name, "Pushed FM");
    }

    #[tokio::test]
    async fn test_pending_local_edit_wins() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.seed_zone(DatabaseScope::Private, ZoneId::new("RadioZone")).await;
        let record_id = RecordId::new("R1", ZoneId::new("RadioZone"));
        remote
            .seed_record(
                DatabaseScope::Private,
                encode_station(&StationFields::new("Remote"), record_id.clone()),
            )
            .await
            .unwrap();
        let ctx = context(remote).await;

        let mut set = LocalWriteSet::new(DatabaseScope::Private);
        set.upserts = decode_records(&[encode_station(&StationFields::new("Old"), record_id)]);
        ctx.db.remote_apply().apply(&set).await.unwrap();
        let local = ctx.db.stations().get_by_record_name("R1").await.unwrap().unwrap();
        ctx.db
            .stations()
            .update(&local.id, StationFields::new("Edited"))
            .await
            .unwrap();

        let notification = Notification::parse(&payload("private", "updated", "R1")).unwrap();
        let report = Executor::new(1)
            .run(build_notification_graph(&ctx, notification))
            .await;
        assert!(report.all_succeeded());

        let station = ctx.db.stations().get_by_id(&local.id).await.unwrap().unwrap();
        assert_eq!(station.fields.name, "Edited");
    }
}
