//! # Pending Mutations
//!
//! Local writes captured in the same transaction as the write itself
//! (outbox pattern). The push stage reads a snapshot once, coalesces it into a
//! [`PendingMutationSet`], and discards exactly the rows it consumed.
//!
//! ## Coalescing per station
//! ```text
//! inserted, updated, updated   →  inserted
//! updated, updated             →  updated
//! inserted, deleted (no id)    →  (nothing: never reached the server)
//! updated, deleted (id)        →  deleted(id)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::record::RecordId;

/// What happened to a station locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Inserted,
    Updated,
    Deleted,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Inserted => "inserted",
            MutationKind::Updated => "updated",
            MutationKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inserted" => Ok(MutationKind::Inserted),
            "updated" => Ok(MutationKind::Updated),
            "deleted" => Ok(MutationKind::Deleted),
            _ => Err(ValidationError::NotAllowed {
                field: "mutation kind".to_string(),
                allowed: vec![
                    "inserted".to_string(),
                    "updated".to_string(),
                    "deleted".to_string(),
                ],
            }),
        }
    }
}

/// One captured local write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    pub station_id: String,
    pub kind: MutationKind,
    /// Remote identity at the time of the write. Needed for deletes, since
    /// the station row is gone by the time the push runs.
    pub record_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
}

/// A station deleted locally that the remote store still has to forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedStation {
    pub station_id: String,
    pub record_id: RecordId,
}

/// Coalesced view over a pending-mutation snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingMutationSet {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<DeletedStation>,
    /// Every row consumed by this snapshot, including coalesced ones.
    pub mutation_ids: Vec<String>,
    /// The same rows grouped by station.
    pub by_station: BTreeMap<String, Vec<String>>,
}

impl PendingMutationSet {
    /// Coalesces mutations (oldest first) into one final state per station.
    pub fn from_mutations(mutations: Vec<PendingMutation>) -> Self {
        let mut set = PendingMutationSet::default();
        let mut per_station: BTreeMap<String, Vec<PendingMutation>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();

        for mutation in mutations {
            set.mutation_ids.push(mutation.id.clone());
            set.by_station
                .entry(mutation.station_id.clone())
                .or_default()
                .push(mutation.id.clone());
            if !per_station.contains_key(&mutation.station_id) {
                order.push(mutation.station_id.clone());
            }
            per_station
                .entry(mutation.station_id.clone())
                .or_default()
                .push(mutation);
        }

        for station_id in order {
            let Some(history) = per_station.remove(&station_id) else {
                continue;
            };

            let deleted = history.iter().rev().find(|m| m.kind == MutationKind::Deleted);
            if let Some(delete) = deleted {
                // Identity can come from the delete row or from any earlier row.
                let record_id = delete
                    .record_id
                    .clone()
                    .or_else(|| history.iter().rev().find_map(|m| m.record_id.clone()));
                if let Some(record_id) = record_id {
                    set.deleted.push(DeletedStation {
                        station_id,
                        record_id,
                    });
                }
            } else if history.iter().any(|m| m.kind == MutationKind::Inserted) {
                set.inserted.push(station_id);
            } else {
                set.updated.push(station_id);
            }
        }

        set
    }

    /// Stations whose current local state must be pushed.
    pub fn changed_station_ids(&self) -> impl Iterator<Item = &str> {
        self.inserted
            .iter()
            .chain(self.updated.iter())
            .map(String::as_str)
    }

    /// Rows of this snapshot that belong to `station_id`.
    pub fn mutation_ids_for(&self, station_id: &str) -> &[String] {
        self.by_station
            .get(station_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.mutation_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZoneId;

    fn mutation(id: &str, station: &str, kind: MutationKind, record: Option<&str>) -> PendingMutation {
        PendingMutation {
            id: id.to_string(),
            station_id: station.to_string(),
            kind,
            record_id: record.map(|r| RecordId::new(r, ZoneId::new("RadioZone"))),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_then_updates_coalesce_to_insert() {
        let set = PendingMutationSet::from_mutations(vec![
            mutation("1", "a", MutationKind::Inserted, None),
            mutation("2", "a", MutationKind::Updated, None),
            mutation("3", "b", MutationKind::Updated, Some("B")),
        ]);

        assert_eq!(set.inserted, vec!["a"]);
        assert_eq!(set.updated, vec!["b"]);
        assert!(set.deleted.is_empty());
        assert_eq!(set.mutation_ids.len(), 3);
        assert_eq!(set.changed_station_ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.mutation_ids_for("a"), ["1", "2"]);
        assert_eq!(set.mutation_ids_for("b"), ["3"]);
        assert!(set.mutation_ids_for("c").is_empty());
    }

    #[test]
    fn test_delete_without_identity_is_dropped() {
        let set = PendingMutationSet::from_mutations(vec![
            mutation("1", "a", MutationKind::Inserted, None),
            mutation("2", "a", MutationKind::Deleted, None),
        ]);

        assert!(set.inserted.is_empty());
        assert!(set.deleted.is_empty());
        // Both rows are still consumed.
        assert_eq!(set.mutation_ids, vec!["1", "2"]);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_delete_wins_and_keeps_identity() {
        let set = PendingMutationSet::from_mutations(vec![
            mutation("1", "a", MutationKind::Updated, Some("A")),
            mutation("2", "a", MutationKind::Deleted, Some("A")),
        ]);

        assert!(set.updated.is_empty());
        assert_eq!(set.deleted.len(), 1);
        assert_eq!(set.deleted[0].record_id.record_name, "A");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("deleted".parse::<MutationKind>().unwrap(), MutationKind::Deleted);
        assert!("removed".parse::<MutationKind>().is_err());
    }
}
