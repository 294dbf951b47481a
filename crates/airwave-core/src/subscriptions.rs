//! # Subscription Reconciler
//!
//! Makes sure a push subscription exists for station changes in each scope.
//!
//! ## Required Triggers
//! ```text
//! ┌──────────┬──────────────────────────────┬─────────────┐
//! │ Scope    │ Triggers                     │ Zone        │
//! ├──────────┼──────────────────────────────┼─────────────┤
//! │ public   │ create, update               │ (none)      │
//! │ private  │ create, update, delete       │ RadioZone   │
//! └──────────┴──────────────────────────────┴─────────────┘
//! ```
//!
//! When ANY subscription already exists in the scope, nothing is planned.
//! Trigger sets of existing subscriptions are not compared, so an older
//! subscription is never upgraded in place. Subscription ids are stable
//! (`<scope>-<recordType>-changes`), which makes a repeated create an upsert.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{DatabaseScope, ZoneId};
use crate::zones::RADIO_ZONE;

/// Record mutation that fires a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTrigger {
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
}

/// A server-side registration for push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub record_type: String,
    pub zone_id: Option<ZoneId>,
    pub triggers: BTreeSet<SubscriptionTrigger>,
    /// Silent (background) delivery.
    pub content_available: bool,
}

/// Triggers a scope needs.
pub fn required_triggers(scope: DatabaseScope) -> BTreeSet<SubscriptionTrigger> {
    use SubscriptionTrigger::*;
    match scope {
        DatabaseScope::Public => [RecordCreated, RecordUpdated].into_iter().collect(),
        DatabaseScope::Private => [RecordCreated, RecordUpdated, RecordDeleted]
            .into_iter()
            .collect(),
    }
}

/// Stable subscription id for a scope and record type.
pub fn subscription_id(scope: DatabaseScope, record_type: &str) -> String {
    format!("{}-{}-changes", scope, record_type)
}

/// Subscriptions to create and ids to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    pub to_create: Vec<Subscription>,
    pub to_delete: Vec<String>,
}

impl SubscriptionPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Plans the subscription for one (scope, record type) pair.
#[derive(Debug, Clone)]
pub struct SubscriptionReconciler {
    scope: DatabaseScope,
    record_type: String,
}

impl SubscriptionReconciler {
    pub fn new(scope: DatabaseScope, record_type: impl Into<String>) -> Self {
        Self {
            scope,
            record_type: record_type.into(),
        }
    }

    /// Station subscriptions for `scope`.
    pub fn stations(scope: DatabaseScope) -> Self {
        Self::new(scope, crate::STATION_RECORD_TYPE)
    }

    /// The subscription this reconciler would create.
    pub fn descriptor(&self) -> Subscription {
        let zone_id = match self.scope {
            DatabaseScope::Public => None,
            DatabaseScope::Private => Some(ZoneId::new(RADIO_ZONE)),
        };

        Subscription {
            subscription_id: subscription_id(self.scope, &self.record_type),
            record_type: self.record_type.clone(),
            zone_id,
            triggers: required_triggers(self.scope),
            content_available: true,
        }
    }

    pub fn plan(&self, existing: &BTreeMap<String, Subscription>) -> SubscriptionPlan {
        if !existing.is_empty() {
            return SubscriptionPlan::default();
        }

        SubscriptionPlan {
            to_create: vec![self.descriptor()],
            to_delete: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_creates_one_per_scope() {
        let public = SubscriptionReconciler::stations(DatabaseScope::Public).plan(&BTreeMap::new());
        let private =
            SubscriptionReconciler::stations(DatabaseScope::Private).plan(&BTreeMap::new());

        assert_eq!(public.to_create.len(), 1);
        assert_eq!(private.to_create.len(), 1);

        let public = &public.to_create[0];
        assert_eq!(public.subscription_id, "public-Station-changes");
        assert_eq!(public.triggers.len(), 2);
        assert!(public.zone_id.is_none());

        let private = &private.to_create[0];
        assert!(private.triggers.contains(&SubscriptionTrigger::RecordDeleted));
        assert_eq!(private.zone_id, Some(ZoneId::new(RADIO_ZONE)));
    }

    #[test]
    fn test_any_existing_subscription_is_sufficient() {
        let reconciler = SubscriptionReconciler::stations(DatabaseScope::Private);

        // An older subscription without delete triggers is left alone.
        let mut stale = reconciler.descriptor();
        stale.subscription_id = "legacy".to_string();
        stale.triggers.remove(&SubscriptionTrigger::RecordDeleted);

        let existing = BTreeMap::from([(stale.subscription_id.clone(), stale)]);
        assert!(reconciler.plan(&existing).is_empty());
    }
}
