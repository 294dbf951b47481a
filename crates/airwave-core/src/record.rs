//! # Remote Record Model
//!
//! The shapes the remote record store speaks in. Nothing in here knows about
//! stations; the [`codec`](crate::codec) module maps between the two worlds.
//!
//! ## Identity Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DatabaseScope ─┬─ Public   (server-seeded stations, query only)       │
//! │                 └─ Private  (user stations, change-fed zones)          │
//! │                                                                         │
//! │  RecordId                                                               │
//! │  ├── record_name   "8F0C…"  unique within its zone                     │
//! │  └── zone_id                                                            │
//! │      ├── zone_name   "RadioZone"                                       │
//! │      └── owner_name  "__defaultOwner__"                                │
//! │                                                                         │
//! │  RemoteRecord = RecordId + record_type + field map + modified_at       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::{CURRENT_USER_OWNER, DEFAULT_ZONE_NAME};

// =============================================================================
// Database Scope
// =============================================================================

/// Which remote database a request or notification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseScope {
    /// Shared, read-mostly catalogue of stations.
    Public,
    /// Per-user database holding user-defined stations.
    Private,
}

impl DatabaseScope {
    /// Both scopes, public first.
    pub const ALL: [DatabaseScope; 2] = [DatabaseScope::Public, DatabaseScope::Private];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseScope::Public => "public",
            DatabaseScope::Private => "private",
        }
    }

    /// Records fetched from this scope become user-defined stations.
    pub fn is_user_scope(&self) -> bool {
        matches!(self, DatabaseScope::Private)
    }
}

impl fmt::Display for DatabaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(DatabaseScope::Public),
            "private" => Ok(DatabaseScope::Private),
            _ => Err(ValidationError::NotAllowed {
                field: "scope".to_string(),
                allowed: vec!["public".to_string(), "private".to_string()],
            }),
        }
    }
}

// =============================================================================
// Zone and Record Identity
// =============================================================================

/// A named partition of a remote database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ZoneId {
    pub zone_name: String,
    pub owner_name: String,
}

impl ZoneId {
    /// Zone owned by the current user.
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            owner_name: CURRENT_USER_OWNER.to_string(),
        }
    }

    pub fn with_owner(zone_name: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            owner_name: owner_name.into(),
        }
    }

    /// The zone every database has and which is never deleted.
    pub fn default_zone() -> Self {
        Self::new(DEFAULT_ZONE_NAME)
    }

    pub fn is_default(&self) -> bool {
        self.zone_name == DEFAULT_ZONE_NAME
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.zone_name, self.owner_name)
    }
}

/// The remote store's reference to one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecordId {
    pub record_name: String,
    pub zone_id: ZoneId,
}

impl RecordId {
    pub fn new(record_name: impl Into<String>, zone_id: ZoneId) -> Self {
        Self {
            record_name: record_name.into(),
            zone_id,
        }
    }

    /// A fresh identity for a record that has never been pushed.
    pub fn generate(zone_id: ZoneId) -> Self {
        Self::new(Uuid::new_v4().to_string().to_uppercase(), zone_id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.record_name, self.zone_id.zone_name)
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// A typed value stored in a remote record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Int64(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Reference(RecordId),
}

impl FieldValue {
    /// Human-readable type name used in codec errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Int64(_) => "int64",
            FieldValue::Double(_) => "double",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Reference(_) => "reference",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

// =============================================================================
// Remote Record
// =============================================================================

/// An opaque field map plus identity, as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_id: RecordId,
    pub record_type: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Server modification time. `None` until the server has stored it.
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    pub fn new(record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            record_id,
            record_type: record_type.into(),
            fields: BTreeMap::new(),
            modified_at: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn record_name(&self) -> &str {
        &self.record_id.record_name
    }
}

// =============================================================================
// Change Token
// =============================================================================

/// Opaque service-issued cursor over a database or zone change feed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ChangeToken(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Tokens are opaque; logging their bytes only adds noise.
impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken({} bytes)", self.0.len())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_and_display() {
        assert_eq!("Private".parse::<DatabaseScope>().unwrap(), DatabaseScope::Private);
        assert_eq!(DatabaseScope::Public.to_string(), "public");
        assert!("shared".parse::<DatabaseScope>().is_err());
    }

    #[test]
    fn test_default_zone() {
        let zone = ZoneId::default_zone();
        assert!(zone.is_default());
        assert!(!ZoneId::new("RadioZone").is_default());
    }

    #[test]
    fn test_generated_record_ids_are_unique() {
        let zone = ZoneId::new("RadioZone");
        let a = RecordId::generate(zone.clone());
        let b = RecordId::generate(zone);
        assert_ne!(a.record_name, b.record_name);
        assert_eq!(a.zone_id, b.zone_id);
    }

    #[test]
    fn test_record_field_access() {
        let mut record = RemoteRecord::new("Station", RecordId::new("a", ZoneId::new("RadioZone")));
        record.set("name", "Radio 1");
        record.set("isSoftDeleted", 0i64);

        assert_eq!(record.get("name").and_then(FieldValue::as_str), Some("Radio 1"));
        assert_eq!(record.get("isSoftDeleted").and_then(FieldValue::as_i64), Some(0));
        assert!(record.remove("name").is_some());
        assert!(record.get("name").is_none());
    }

    #[test]
    fn test_change_token_debug_hides_bytes() {
        let token = ChangeToken::from_bytes(vec![1, 2, 3]);
        assert_eq!(format!("{:?}", token), "ChangeToken(3 bytes)");
    }
}
