//! # Error Types
//!
//! Domain-specific error types for airwave-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  airwave-core errors (this file)                                       │
//! │  ├── CoreError        - Codec and domain rule failures                 │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  airwave-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  airwave-sync errors (separate crate)                                  │
//! │  ├── RemoteError      - Remote store gateway failures                  │
//! │  └── SyncError        - What the coordinator logs                      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core sync logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A remote record has a type this codec does not understand.
    ///
    /// ## When This Occurs
    /// - A zone holds record types added by a newer client
    /// - A query or notification targets the wrong record type
    #[error("Unsupported record type: {0}")]
    UnsupportedRecordType(String),

    /// A field required to build a local entity is absent.
    #[error("Record {record_name} is missing required field '{field}'")]
    MissingField { record_name: String, field: String },

    /// A field carries a value of an unexpected type.
    ///
    /// ## When This Occurs
    /// - Another client wrote `name` as a number
    /// - Schema drift between app versions
    #[error("Field '{field}' on record {record_name} has wrong type (expected {expected})")]
    FieldType {
        record_name: String,
        field: String,
        expected: &'static str,
    },

    /// A persisted blob could not be decoded.
    ///
    /// ## When This Occurs
    /// - Blob written by a newer format version
    /// - Blob kind mismatch (token stored under an identity key)
    /// - Corrupted bytes
    #[error("Invalid {kind} blob: {reason}")]
    InvalidBlob { kind: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Used for early validation before anything reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., invalid URL).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::FieldType {
            record_name: "abc".to_string(),
            field: "name".to_string(),
            expected: "string",
        };
        assert_eq!(
            err.to_string(),
            "Field 'name' on record abc has wrong type (expected string)"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");

        let err = ValidationError::TooLong {
            field: "city".to_string(),
            max: 100,
        };
        assert_eq!(err.to_string(), "city must be at most 100 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
