//! # Station Entity
//!
//! The locally owned entity the sync engine moves back and forth.
//!
//! ## Identity Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Station                                                                │
//! │  ├── id            UUID v4, generated once, never changes              │
//! │  ├── record_id     remote identity, None until the first push          │
//! │  │                 (assigned exactly once, never regenerated)          │
//! │  ├── fields        business data (name, url, city, ...)                │
//! │  ├── is_user_defined   true = authored here or in the private scope    │
//! │  └── created_at / updated_at   set by the store, never by callers      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::record::RecordId;

/// Business fields of a station. This is everything that travels to the
/// remote store; identity and timestamps are handled separately.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StationFields {
    pub name: String,
    /// Stream URL as entered. Validated on input, stored verbatim.
    pub url: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub is_soft_deleted: bool,
}

impl StationFields {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_location(mut self, city: impl Into<String>, country: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.country = Some(country.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A persisted station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Station {
    pub id: String,
    pub record_id: Option<RecordId>,
    #[serde(flatten)]
    #[ts(flatten)]
    pub fields: StationFields,
    pub is_user_defined: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Station {
    pub fn record_name(&self) -> Option<&str> {
        self.record_id.as_ref().map(|id| id.record_name.as_str())
    }

    /// True once the station has an identity in the remote store.
    pub fn has_remote_identity(&self) -> bool {
        self.record_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZoneId;

    #[test]
    fn test_fields_builder() {
        let fields = StationFields::new("Radio 538")
            .with_url("https://stream.538.nl/538")
            .with_location("Hilversum", "NL")
            .with_description("Hits");

        assert_eq!(fields.name, "Radio 538");
        assert_eq!(fields.city.as_deref(), Some("Hilversum"));
        assert!(!fields.is_soft_deleted);
    }

    #[test]
    fn test_record_name_follows_identity() {
        let now = Utc::now();
        let mut station = Station {
            id: "local-1".to_string(),
            record_id: None,
            fields: StationFields::new("x"),
            is_user_defined: true,
            created_at: now,
            updated_at: now,
        };
        assert!(station.record_name().is_none());
        assert!(!station.has_remote_identity());

        station.record_id = Some(RecordId::new("ABC", ZoneId::new("RadioZone")));
        assert_eq!(station.record_name(), Some("ABC"));
    }
}
