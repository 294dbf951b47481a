//! # Pipeline Stages
//!
//! Builders that turn one sync cycle into an [`OperationGraph`]. The graphs
//! are plain data: they can be built and inspected without a network, and
//! only touch the remote store once the executor runs them.
//!
//! ## Private Cycle
//! ```text
//!  zones.fetch → zones.plan → zones.modify          (bootstrap only)
//!        → subscriptions.fetch → .plan → .modify    (bootstrap only)
//!        → database_changes → zone_changes ─┐
//!                          local_snapshot ──┴→ reconcile → apply → push
//! ```
//!
//! ## Public Cycle
//! ```text
//!  query → apply [→ subscriptions.fetch → .plan → .modify on app start]
//! ```
//!
//! Stages hand results to each other through [`Slot`](crate::executor::Slot)s.
//! A stage whose input slot is empty fails with `MissingInput` instead of
//! acting on partial data.

pub mod private;
pub mod public;
pub mod push;
pub mod subscriptions;
pub mod zones;

use std::sync::Arc;

use airwave_core::codec::{decode_station, DecodedStation};
use airwave_core::RemoteRecord;
use airwave_db::Database;
use tracing::warn;

use crate::config::SyncSettings;
use crate::remote::{ItemError, RemoteStore};
use crate::status::StatusReporter;

/// Everything a stage needs, cheap to clone into operation bodies.
#[derive(Clone)]
pub struct SyncContext {
    pub db: Database,
    pub remote: Arc<dyn RemoteStore>,
    pub settings: SyncSettings,
    pub status: StatusReporter,
}

impl SyncContext {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        settings: SyncSettings,
        status: StatusReporter,
    ) -> Self {
        SyncContext {
            db,
            remote,
            settings,
            status,
        }
    }
}

/// Decodes remote records, skipping the ones that do not map to a station.
pub(crate) fn decode_records(records: &[RemoteRecord]) -> Vec<DecodedStation> {
    records
        .iter()
        .filter_map(|record| match decode_station(record) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(record = %record.record_id, error = %err, "Skipping undecodable record");
                None
            }
        })
        .collect()
}

/// Logs per-item rejections of a batch.
pub(crate) fn log_item_errors<T: std::fmt::Debug>(what: &str, errors: &[ItemError<T>]) {
    for rejected in errors {
        warn!(item = ?rejected.item, error = %rejected.error, "{} rejected", what);
    }
}
