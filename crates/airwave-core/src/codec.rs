//! # Record Codec
//!
//! Bidirectional mapping between [`StationFields`] and [`RemoteRecord`].
//!
//! ## Field Projection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   StationFields            RemoteRecord ("Station")                     │
//! │   ─────────────            ────────────────────────                     │
//! │   name            ───────► name           String                       │
//! │   url             ───────► url            String (URL checked on read) │
//! │   city            ───────► city           String                       │
//! │   country         ───────► country        String                       │
//! │   description     ───────► desc           String                       │
//! │   is_soft_deleted ───────► isSoftDeleted  Int64 0 / 1                  │
//! │                                                                         │
//! │   NEVER PROJECTED (gateway/server owned):                              │
//! │   recordID, recordName, publicZone, userDefined, isUserDefined,        │
//! │   createdAt, updatedAt                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `None` fields are omitted on encode and read back as `None`, so a round
//! trip reproduces every business field exactly.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::record::{FieldValue, RecordId, RemoteRecord};
use crate::station::StationFields;
use crate::STATION_RECORD_TYPE;

/// Remote field keys for the Station record type.
pub mod keys {
    pub const NAME: &str = "name";
    pub const URL: &str = "url";
    pub const CITY: &str = "city";
    pub const COUNTRY: &str = "country";
    pub const DESCRIPTION: &str = "desc";
    pub const IS_SOFT_DELETED: &str = "isSoftDeleted";
}

/// Keys that are managed by the server or the local store and must never be
/// sent in a push payload nor read back into business fields.
pub const SYSTEM_FIELDS: &[&str] = &[
    "recordID",
    "recordName",
    "publicZone",
    "userDefined",
    "isUserDefined",
    "createdAt",
    "updatedAt",
];

pub fn is_system_field(key: &str) -> bool {
    SYSTEM_FIELDS.contains(&key)
}

/// A remote record decoded into station terms.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStation {
    pub record_id: RecordId,
    pub fields: StationFields,
    pub modified_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Encode
// =============================================================================

/// Builds the outbound record for a station under the given identity.
pub fn encode_station(fields: &StationFields, record_id: RecordId) -> RemoteRecord {
    let mut record = RemoteRecord::new(STATION_RECORD_TYPE, record_id);

    record.set(keys::NAME, fields.name.as_str());
    if let Some(url) = &fields.url {
        record.set(keys::URL, url.as_str());
    }
    if let Some(city) = &fields.city {
        record.set(keys::CITY, city.as_str());
    }
    if let Some(country) = &fields.country {
        record.set(keys::COUNTRY, country.as_str());
    }
    if let Some(description) = &fields.description {
        record.set(keys::DESCRIPTION, description.as_str());
    }
    record.set(keys::IS_SOFT_DELETED, i64::from(fields.is_soft_deleted));

    record
}

// =============================================================================
// Decode
// =============================================================================

/// Reads a station out of a remote record.
///
/// Unknown keys and system fields are ignored. A missing or non-string `name`
/// is an error; an unparseable `url` decodes as absent.
pub fn decode_station(record: &RemoteRecord) -> CoreResult<DecodedStation> {
    if record.record_type != STATION_RECORD_TYPE {
        return Err(CoreError::UnsupportedRecordType(record.record_type.clone()));
    }

    let name = optional_string(record, keys::NAME)?.ok_or_else(|| CoreError::MissingField {
        record_name: record.record_name().to_string(),
        field: keys::NAME.to_string(),
    })?;

    let url = optional_string(record, keys::URL)?.filter(|raw| Url::parse(raw).is_ok());

    let is_soft_deleted = match record.get(keys::IS_SOFT_DELETED) {
        None => false,
        Some(FieldValue::Int64(v)) => *v != 0,
        Some(_) => {
            return Err(type_error(record, keys::IS_SOFT_DELETED, "int64"));
        }
    };

    Ok(DecodedStation {
        record_id: record.record_id.clone(),
        fields: StationFields {
            name,
            url,
            city: optional_string(record, keys::CITY)?,
            country: optional_string(record, keys::COUNTRY)?,
            description: optional_string(record, keys::DESCRIPTION)?,
            is_soft_deleted,
        },
        modified_at: record.modified_at,
    })
}

fn optional_string(record: &RemoteRecord, key: &str) -> CoreResult<Option<String>> {
    match record.get(key) {
        None => Ok(None),
        Some(FieldValue::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(type_error(record, key, "string")),
    }
}

fn type_error(record: &RemoteRecord, key: &str, expected: &'static str) -> CoreError {
    CoreError::FieldType {
        record_name: record.record_name().to_string(),
        field: key.to_string(),
        expected,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZoneId;

    fn sample_fields() -> StationFields {
        StationFields::new("Radio Paradise")
            .with_url("https://stream.radioparadise.com/aac-320")
            .with_location("Paradise", "US")
            .with_description("Eclectic")
    }

    fn record_id() -> RecordId {
        RecordId::new("5D1A", ZoneId::new("RadioZone"))
    }

    #[test]
    fn test_round_trip_preserves_business_fields() {
        let mut fields = sample_fields();
        fields.is_soft_deleted = true;

        let record = encode_station(&fields, record_id());
        let decoded = decode_station(&record).unwrap();

        assert_eq!(decoded.fields, fields);
        assert_eq!(decoded.record_id, record_id());
    }

    #[test]
    fn test_round_trip_with_absent_fields() {
        let fields = StationFields::new("Bare");
        let record = encode_station(&fields, record_id());

        assert!(record.get(keys::URL).is_none());
        assert_eq!(decode_station(&record).unwrap().fields, fields);
    }

    #[test]
    fn test_encode_never_emits_system_fields() {
        let record = encode_station(&sample_fields(), record_id());
        assert!(record.fields.keys().all(|k| !is_system_field(k)));
        assert_eq!(record.get(keys::DESCRIPTION).and_then(FieldValue::as_str), Some("Eclectic"));
        assert_eq!(record.get(keys::IS_SOFT_DELETED).and_then(FieldValue::as_i64), Some(0));
    }

    #[test]
    fn test_decode_ignores_system_and_unknown_fields() {
        let mut record = encode_station(&sample_fields(), record_id());
        record.set("createdAt", "2020-01-01");
        record.set("isUserDefined", 1i64);
        record.set("bitrate", 320i64);

        assert_eq!(decode_station(&record).unwrap().fields, sample_fields());
    }

    #[test]
    fn test_decode_invalid_url_becomes_absent() {
        let mut record = encode_station(&sample_fields(), record_id());
        record.set(keys::URL, "not a url");

        assert!(decode_station(&record).unwrap().fields.url.is_none());
    }

    #[test]
    fn test_decode_errors() {
        let mut record = encode_station(&sample_fields(), record_id());
        record.remove(keys::NAME);
        assert!(matches!(decode_station(&record), Err(CoreError::MissingField { .. })));

        let mut record = encode_station(&sample_fields(), record_id());
        record.set(keys::CITY, 12i64);
        assert!(matches!(decode_station(&record), Err(CoreError::FieldType { .. })));

        let mut record = encode_station(&sample_fields(), record_id());
        record.record_type = "Playlist".to_string();
        assert!(matches!(
            decode_station(&record),
            Err(CoreError::UnsupportedRecordType(_))
        ));
    }
}
