//! # Zone Reconciler
//!
//! Diffs the expected zone set against what the private database holds.
//!
//! ```text
//! missing  = expected − existing
//! orphaned = existing − expected − {default zone}
//! ```
//!
//! Running the plan twice against an unchanged remote zone list produces an
//! empty plan the second time.

use std::collections::BTreeSet;

use crate::record::ZoneId;

/// Zone holding every user-defined station.
pub const RADIO_ZONE: &str = "RadioZone";

/// Version of [`EXPECTED_ZONE_NAMES`]. Bump when the list changes.
pub const ZONE_SET_VERSION: u32 = 1;

/// Zones this build expects in the private database.
pub const EXPECTED_ZONE_NAMES: &[&str] = &[RADIO_ZONE];

/// The zone new records of a given type are created in.
pub fn zone_for_record_type(record_type: &str) -> Option<ZoneId> {
    match record_type {
        crate::STATION_RECORD_TYPE => Some(ZoneId::new(RADIO_ZONE)),
        _ => None,
    }
}

/// Zones to create and zones to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZonePlan {
    pub to_create: Vec<ZoneId>,
    pub to_delete: Vec<ZoneId>,
}

impl ZonePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes [`ZonePlan`]s for a fixed expected zone set.
#[derive(Debug, Clone)]
pub struct ZoneReconciler {
    expected: BTreeSet<String>,
}

impl Default for ZoneReconciler {
    fn default() -> Self {
        Self::new(EXPECTED_ZONE_NAMES.iter().copied())
    }
}

impl ZoneReconciler {
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn expected(&self) -> impl Iterator<Item = &str> {
        self.expected.iter().map(String::as_str)
    }

    /// Plans creates and deletes against the full existing zone list.
    pub fn plan(&self, existing: &[ZoneId]) -> ZonePlan {
        let existing_names: BTreeSet<&str> =
            existing.iter().map(|z| z.zone_name.as_str()).collect();

        let to_create = self
            .expected
            .iter()
            .filter(|name| !existing_names.contains(name.as_str()))
            .map(ZoneId::new)
            .collect();

        let to_delete = existing
            .iter()
            .filter(|zone| !zone.is_default() && !self.expected.contains(&zone.zone_name))
            .cloned()
            .collect();

        ZonePlan {
            to_create,
            to_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_creates_expected_set() {
        let plan = ZoneReconciler::default().plan(&[ZoneId::default_zone()]);
        assert_eq!(plan.to_create, vec![ZoneId::new(RADIO_ZONE)]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_orphans_are_deleted_but_default_survives() {
        let existing = vec![
            ZoneId::default_zone(),
            ZoneId::new(RADIO_ZONE),
            ZoneId::new("LegacyZone"),
        ];
        let plan = ZoneReconciler::default().plan(&existing);
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_delete, vec![ZoneId::new("LegacyZone")]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let reconciler = ZoneReconciler::new(["RadioZone", "Favorites"]);
        let mut remote = vec![ZoneId::default_zone(), ZoneId::new("Old")];

        let first = reconciler.plan(&remote);
        assert_eq!(first.to_create.len(), 2);
        assert_eq!(first.to_delete.len(), 1);

        remote.retain(|z| !first.to_delete.contains(z));
        remote.extend(first.to_create.iter().cloned());

        assert!(reconciler.plan(&remote).is_empty());
    }

    #[test]
    fn test_zone_for_record_type() {
        assert_eq!(zone_for_record_type("Station"), Some(ZoneId::new(RADIO_ZONE)));
        assert_eq!(zone_for_record_type("Genre"), None);
    }
}
