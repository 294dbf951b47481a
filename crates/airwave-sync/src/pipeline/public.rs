//! # Public Cycle
//!
//! The public scope is queried, not change-fed. Each cycle asks for station
//! records modified after the stored lower bound and applies them as
//! server-seeded stations.
//!
//! The new lower bound is the instant the query STARTED, written in the
//! same transaction as the records. Anything modified while the query ran
//! is fetched again next time instead of being skipped.

use airwave_core::{DatabaseScope, RemoteRecord, STATION_RECORD_TYPE};
use airwave_db::{LocalWriteSet, StateUpdate, SyncStateKey};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::subscriptions::add_subscription_stages;
use super::{decode_records, SyncContext};
use crate::error::SyncError;
use crate::executor::{OperationGraph, Priority, Slot};
use crate::remote::RecordQuery;
use crate::status::SyncPhase;

pub const QUERY: &str = "public.query";
pub const APPLY: &str = "public.apply";

const SCOPE: DatabaseScope = DatabaseScope::Public;

#[derive(Debug, Clone)]
struct PublicFetch {
    records: Vec<RemoteRecord>,
    started_at: DateTime<Utc>,
}

/// Builds the public-scope graph. Subscriptions are reconciled after the
/// apply when `reconcile_subscriptions` is set.
pub fn build_public_graph(
    ctx: &SyncContext,
    reconcile_subscriptions: bool,
    priority: Priority,
) -> OperationGraph {
    let mut graph = OperationGraph::new("public");
    graph.keep_alive("public sync");

    let fetched: Slot<PublicFetch> = Slot::new();

    let query = {
        let ctx = ctx.clone();
        let fetched = fetched.clone();
        graph.add(QUERY, priority, &[], move || async move {
            ctx.status.enter(SCOPE, SyncPhase::FetchingPublicChanges).await;
            let started_at = Utc::now();
            let since = ctx.db.sync_state().last_public_sync().await?;

            let query = RecordQuery {
                record_type: STATION_RECORD_TYPE.to_string(),
                modified_after: since,
                page_size: ctx.settings.fetch_page_size,
            };

            let mut records = Vec::new();
            let mut cursor = None;
            loop {
                let page = ctx.remote.query(SCOPE, &query, cursor.as_ref()).await?;
                records.extend(page.records);
                match page.cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            debug!(since = ?since, count = records.len(), "Public stations queried");
            fetched.put(PublicFetch { records, started_at }).await;
            Ok(())
        })
    };

    let apply = {
        let ctx = ctx.clone();
        graph.add(APPLY, priority, &[query], move || async move {
            let fetch = fetched
                .take()
                .await
                .ok_or(SyncError::MissingInput("public query results"))?;
            ctx.status.enter(SCOPE, SyncPhase::ApplyingPublicChanges).await;

            let mut set = LocalWriteSet::new(SCOPE);
            set.upserts = decode_records(&fetch.records);
            set.state.push(StateUpdate::SetTimestamp(
                SyncStateKey::LastPublicSync,
                fetch.started_at,
            ));

            let summary = ctx.db.remote_apply().apply(&set).await?;
            info!(
                inserted = summary.inserted,
                updated = summary.updated,
                "Public changes applied"
            );
            Ok(())
        })
    };

    if reconcile_subscriptions {
        add_subscription_stages(&mut graph, ctx, SCOPE, None, priority, &[apply]);
    }

    graph
}
