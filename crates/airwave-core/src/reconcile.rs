//! # Reconciliation Engine
//!
//! Merges server-origin changes with locally pending mutations.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Local delete  vs remote change  → stays deleted; delete is pushed  │
//! │  2. Remote delete vs local edit     → deleted locally; edit discarded, │
//! │                                       acknowledged, never re-pushed    │
//! │  3. New local station               → fresh RecordId assigned once;    │
//! │                                       persisted BEFORE the push        │
//! │  4. Push payload                    → business fields only             │
//! │                                                                         │
//! │  Local edit vs remote change (both updates): local edit wins, remote   │
//! │  change is not applied and the local state is pushed over it.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are matched by record name, which is unique within a zone.
//! Every input record lands in exactly one output bucket.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::encode_station;
use crate::record::{RecordId, RemoteRecord, ZoneId};
use crate::station::Station;
use crate::zones::RADIO_ZONE;

/// Everything one sync cycle knows about.
#[derive(Debug, Clone, Default)]
pub struct ReconcileInput {
    /// Stations inserted or updated locally since the last push.
    pub local_changed: Vec<Station>,
    /// Identities of stations deleted locally since the last push.
    pub local_deleted: Vec<RecordId>,
    /// Records the server reports as changed.
    pub remote_changed: Vec<RemoteRecord>,
    /// Records the server reports as deleted.
    pub remote_deleted: Vec<RecordId>,
}

/// A remote identity newly given to a local station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedIdentity {
    pub station_id: String,
    pub record_id: RecordId,
}

/// Write-sets produced by one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Remote records to apply to the local store.
    pub local_writes: Vec<RemoteRecord>,
    /// Identities to delete from the local store.
    pub local_deletes: Vec<RecordId>,
    /// Records to save remotely.
    pub remote_saves: Vec<RemoteRecord>,
    /// Identities to delete remotely.
    pub remote_deletes: Vec<RecordId>,
    /// Identities to persist locally before the push runs.
    pub assigned_identities: Vec<AssignedIdentity>,
    /// Local edits dropped because the server already deleted the record.
    pub acknowledged_deletes: Vec<RecordId>,
    /// Remote changes skipped because a local edit takes precedence.
    pub superseded_remote: Vec<RecordId>,
}

impl ReconcileOutcome {
    pub fn has_local_work(&self) -> bool {
        !self.local_writes.is_empty()
            || !self.local_deletes.is_empty()
            || !self.assigned_identities.is_empty()
    }

    pub fn has_remote_work(&self) -> bool {
        !self.remote_saves.is_empty() || !self.remote_deletes.is_empty()
    }
}

/// Applies the reconciliation rules.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    new_record_zone: ZoneId,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(ZoneId::new(RADIO_ZONE))
    }
}

impl ReconciliationEngine {
    /// `new_record_zone` is where stations without an identity are created.
    pub fn new(new_record_zone: ZoneId) -> Self {
        Self { new_record_zone }
    }

    pub fn reconcile(&self, input: ReconcileInput) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let remote_deleted: BTreeMap<String, RecordId> = input
            .remote_deleted
            .into_iter()
            .map(|id| (id.record_name.clone(), id))
            .collect();
        let local_deleted: BTreeMap<String, RecordId> = input
            .local_deleted
            .into_iter()
            .map(|id| (id.record_name.clone(), id))
            .collect();
        let locally_edited: BTreeSet<String> = input
            .local_changed
            .iter()
            .filter_map(|s| s.record_name().map(str::to_string))
            .collect();

        // Remote changes, last occurrence of a record name wins.
        let mut remote_changed: BTreeMap<String, RemoteRecord> = BTreeMap::new();
        for record in input.remote_changed {
            remote_changed.insert(record.record_name().to_string(), record);
        }

        for (name, record) in remote_changed {
            if local_deleted.contains_key(&name) || remote_deleted.contains_key(&name) {
                continue;
            }
            if locally_edited.contains(&name) {
                outcome.superseded_remote.push(record.record_id);
                continue;
            }
            outcome.local_writes.push(record);
        }

        for (name, id) in &local_deleted {
            // Already gone on the server; nothing left to push.
            if !remote_deleted.contains_key(name) {
                outcome.remote_deletes.push(id.clone());
            }
        }

        outcome.local_deletes = remote_deleted.values().cloned().collect();

        for station in input.local_changed {
            if let Some(name) = station.record_name() {
                if let Some(id) = remote_deleted.get(name) {
                    outcome.acknowledged_deletes.push(id.clone());
                    continue;
                }
            }

            let record_id = match &station.record_id {
                Some(id) => id.clone(),
                None => {
                    let id = RecordId::generate(self.new_record_zone.clone());
                    outcome.assigned_identities.push(AssignedIdentity {
                        station_id: station.id.clone(),
                        record_id: id.clone(),
                    });
                    id
                }
            };

            outcome
                .remote_saves
                .push(encode_station(&station.fields, record_id));
        }

        outcome
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::is_system_field;
    use crate::station::StationFields;
    use chrono::Utc;

    fn zone() -> ZoneId {
        ZoneId::new(RADIO_ZONE)
    }

    fn rid(name: &str) -> RecordId {
        RecordId::new(name, zone())
    }

    fn station(id: &str, record: Option<&str>, name: &str) -> Station {
        let now = Utc::now();
        Station {
            id: id.to_string(),
            record_id: record.map(rid),
            fields: StationFields::new(name),
            is_user_defined: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn remote(name: &str, station_name: &str) -> RemoteRecord {
        encode_station(&StationFields::new(station_name), rid(name))
    }

    #[test]
    fn test_local_delete_beats_remote_update() {
        let outcome = ReconciliationEngine::default().reconcile(ReconcileInput {
            local_deleted: vec![rid("A")],
            remote_changed: vec![remote("A", "renamed elsewhere"), remote("B", "new")],
            ..Default::default()
        });

        assert_eq!(outcome.local_writes.len(), 1);
        assert_eq!(outcome.local_writes[0].record_name(), "B");
        assert_eq!(outcome.remote_deletes, vec![rid("A")]);
    }

    #[test]
    fn test_remote_delete_beats_local_edit() {
        let outcome = ReconciliationEngine::default().reconcile(ReconcileInput {
            local_changed: vec![station("s1", Some("A"), "edited here")],
            remote_deleted: vec![rid("A")],
            ..Default::default()
        });

        assert_eq!(outcome.local_deletes, vec![rid("A")]);
        assert_eq!(outcome.acknowledged_deletes, vec![rid("A")]);
        assert!(outcome.remote_saves.is_empty());
        assert!(outcome.remote_deletes.is_empty());
    }

    #[test]
    fn test_new_station_gets_identity_once() {
        let engine = ReconciliationEngine::default();
        let outcome = engine.reconcile(ReconcileInput {
            local_changed: vec![station("s1", None, "Fresh")],
            ..Default::default()
        });

        assert_eq!(outcome.assigned_identities.len(), 1);
        let assigned = &outcome.assigned_identities[0];
        assert_eq!(assigned.station_id, "s1");
        assert_eq!(assigned.record_id.zone_id, zone());
        assert_eq!(outcome.remote_saves[0].record_id, assigned.record_id);

        // Once persisted, the next pass reuses it.
        let retry = engine.reconcile(ReconcileInput {
            local_changed: vec![station(
                "s1",
                Some(&assigned.record_id.record_name),
                "Fresh",
            )],
            ..Default::default()
        });
        assert!(retry.assigned_identities.is_empty());
        assert_eq!(retry.remote_saves[0].record_id, assigned.record_id);
    }

    #[test]
    fn test_local_edit_supersedes_remote_update() {
        let outcome = ReconciliationEngine::default().reconcile(ReconcileInput {
            local_changed: vec![station("s1", Some("A"), "mine")],
            remote_changed: vec![remote("A", "theirs")],
            ..Default::default()
        });

        assert!(outcome.local_writes.is_empty());
        assert_eq!(outcome.superseded_remote, vec![rid("A")]);
        assert_eq!(outcome.remote_saves.len(), 1);
    }

    #[test]
    fn test_both_sides_deleted_pushes_nothing() {
        let outcome = ReconciliationEngine::default().reconcile(ReconcileInput {
            local_deleted: vec![rid("A")],
            remote_deleted: vec![rid("A")],
            ..Default::default()
        });

        assert!(outcome.remote_deletes.is_empty());
        assert_eq!(outcome.local_deletes, vec![rid("A")]);
        assert!(!outcome.has_remote_work());
    }

    #[test]
    fn test_push_payload_has_no_system_fields() {
        let outcome = ReconciliationEngine::default().reconcile(ReconcileInput {
            local_changed: vec![station("s1", Some("A"), "x")],
            ..Default::default()
        });
        assert!(outcome.remote_saves[0]
            .fields
            .keys()
            .all(|k| !is_system_field(k)));
    }
}
