//! # Validation Module
//!
//! Input validation for locally authored stations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Host UI                                                      │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: StationRepository (airwave-db)                               │
//! │  └── THIS MODULE: validate_station_fields before insert/update         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE record_name                                                │
//! │                                                                         │
//! │  Remote records are NOT validated here: the codec decodes whatever     │
//! │  the server holds, coercing bad URLs to "absent".                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use url::Url;

use crate::error::ValidationError;
use crate::station::StationFields;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest station name accepted from local input.
pub const MAX_NAME_LEN: usize = 200;

/// Longest free-text field (city, country, description).
pub const MAX_TEXT_LEN: usize = 1000;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a station name.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 200 characters
///
/// ## Example
/// ```rust
/// use airwave_core::validation::validate_station_name;
///
/// assert!(validate_station_name("Radio 538").is_ok());
/// assert!(validate_station_name("  ").is_err());
/// ```
pub fn validate_station_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a stream URL.
///
/// ## Rules
/// - Must parse as an absolute URL
/// - Scheme must be http or https
pub fn validate_stream_url(url: &str) -> ValidationResult<()> {
    let parsed = Url::parse(url.trim()).map_err(|e| ValidationError::InvalidFormat {
        field: "url".to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ValidationError::NotAllowed {
            field: "url scheme".to_string(),
            allowed: vec!["http".to_string(), "https".to_string()],
        }),
    }
}

fn validate_optional_text(field: &str, value: Option<&str>) -> ValidationResult<()> {
    match value {
        Some(text) if text.chars().count() > MAX_TEXT_LEN => Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        }),
        _ => Ok(()),
    }
}

/// Validates every business field of a locally authored station.
pub fn validate_station_fields(fields: &StationFields) -> ValidationResult<()> {
    validate_station_name(&fields.name)?;

    if let Some(url) = fields.url.as_deref() {
        validate_stream_url(url)?;
    }

    validate_optional_text("city", fields.city.as_deref())?;
    validate_optional_text("country", fields.country.as_deref())?;
    validate_optional_text("description", fields.description.as_deref())?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
