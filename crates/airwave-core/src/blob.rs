//! # Versioned Blob Format
//!
//! Persisted identity and cursor data is wrapped in a small self-describing
//! JSON envelope so it survives upgrades deterministically:
//!
//! ```text
//! { "v": 1, "kind": "change_token", "data": [12, 0, 0, 0, 0, 0, 0, 7] }
//! ```
//!
//! - `v` is checked first; blobs from a newer format are rejected, never guessed.
//! - `kind` guards against reading a token where an identity was stored.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::record::{ChangeToken, RecordId};

/// Current envelope version written by this build.
pub const BLOB_FORMAT_VERSION: u8 = 1;

/// What a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    RecordId,
    ChangeToken,
    Flag,
    Timestamp,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::RecordId => "record_id",
            BlobKind::ChangeToken => "change_token",
            BlobKind::Flag => "flag",
            BlobKind::Timestamp => "timestamp",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u8,
    kind: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Header {
    v: u8,
    kind: String,
}

#[derive(Deserialize)]
struct EnvelopeIn<T> {
    data: T,
}

fn invalid(kind: BlobKind, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidBlob {
        kind: kind.as_str().to_string(),
        reason: reason.into(),
    }
}

/// Wraps `value` in a versioned envelope.
pub fn encode<T: Serialize>(kind: BlobKind, value: &T) -> CoreResult<Vec<u8>> {
    serde_json::to_vec(&EnvelopeOut {
        v: BLOB_FORMAT_VERSION,
        kind: kind.as_str(),
        data: value,
    })
    .map_err(|e| invalid(kind, e.to_string()))
}

/// Unwraps a versioned envelope, checking version and kind.
pub fn decode<T: DeserializeOwned>(kind: BlobKind, bytes: &[u8]) -> CoreResult<T> {
    let header: Header = serde_json::from_slice(bytes).map_err(|e| invalid(kind, e.to_string()))?;

    if header.v == 0 || header.v > BLOB_FORMAT_VERSION {
        return Err(invalid(kind, format!("unsupported version {}", header.v)));
    }
    if header.kind != kind.as_str() {
        return Err(invalid(kind, format!("found kind '{}'", header.kind)));
    }

    let envelope: EnvelopeIn<T> =
        serde_json::from_slice(bytes).map_err(|e| invalid(kind, e.to_string()))?;
    Ok(envelope.data)
}

// =============================================================================
// Typed Helpers
// =============================================================================

pub fn encode_record_id(id: &RecordId) -> CoreResult<Vec<u8>> {
    encode(BlobKind::RecordId, id)
}

pub fn decode_record_id(bytes: &[u8]) -> CoreResult<RecordId> {
    decode(BlobKind::RecordId, bytes)
}

pub fn encode_token(token: &ChangeToken) -> CoreResult<Vec<u8>> {
    encode(BlobKind::ChangeToken, token)
}

pub fn decode_token(bytes: &[u8]) -> CoreResult<ChangeToken> {
    decode(BlobKind::ChangeToken, bytes)
}

pub fn encode_flag(value: bool) -> CoreResult<Vec<u8>> {
    encode(BlobKind::Flag, &value)
}

pub fn decode_flag(bytes: &[u8]) -> CoreResult<bool> {
    decode(BlobKind::Flag, bytes)
}

pub fn encode_timestamp(value: &DateTime<Utc>) -> CoreResult<Vec<u8>> {
    encode(BlobKind::Timestamp, value)
}

pub fn decode_timestamp(bytes: &[u8]) -> CoreResult<DateTime<Utc>> {
    decode(BlobKind::Timestamp, bytes)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZoneId;

    #[test]
    fn test_record_id_blob() {
        let id = RecordId::new("A1", ZoneId::new("RadioZone"));
        let bytes = encode_record_id(&id).unwrap();

        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with(r#"{"v":1,"kind":"record_id""#));
        assert_eq!(decode_record_id(&bytes).unwrap(), id);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let bytes = encode_token(&ChangeToken::from_bytes(vec![1, 2])).unwrap();
        let err = decode_record_id(&bytes).unwrap_err();
        assert!(err.to_string().contains("found kind 'change_token'"));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let bytes = br#"{"v":9,"kind":"flag","data":true}"#;
        assert!(decode_flag(bytes).is_err());

        let bytes = br#"{"v":1,"kind":"flag","data":true}"#;
        assert!(decode_flag(bytes).unwrap());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_token(b"\x00\x01binary-plist").is_err());
    }
}
