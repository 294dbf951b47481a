//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Remote Store   │  │     Notification        │ │
//! │  │                 │  │  (RemoteError)  │  │                         │ │
//! │  │  InvalidConfig  │  │  Network        │  │  InvalidNotification    │ │
//! │  │  ConfigLoad     │  │  Timeout        │  │                         │ │
//! │  │  ConfigSave     │  │  TokenExpired   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │     Codec       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  Codec          │  │  OperationPanicked      │ │
//! │  │                 │  │  Serialization  │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use airwave_core::{CoreError, RecordId, ZoneId};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Remote Store Errors
// =============================================================================

/// Failure reported by a [`RemoteStore`](crate::remote::RemoteStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never reached the service or the connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The service asked us to slow down.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The service is temporarily unavailable.
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Another request is modifying the same zone.
    #[error("Zone busy: {0}")]
    ZoneBusy(ZoneId),

    /// The stored change token is no longer accepted.
    #[error("Change token expired")]
    ChangeTokenExpired,

    #[error("Zone not found: {0}")]
    ZoneNotFound(ZoneId),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// The user is not signed in to the remote account.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Anything else the service rejected.
    #[error("Remote store error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true if the next trigger may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::Timeout
                | RemoteError::RateLimited { .. }
                | RemoteError::ServiceUnavailable
                | RemoteError::ZoneBusy(_)
        )
    }
}

// =============================================================================
// Sync Errors
// =============================================================================

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote refused some records of a push. Their mutations stay pending.
    #[error("{rejected} pushed record(s) rejected, first: {first}")]
    PushRejected { rejected: usize, first: RemoteError },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Local store failure. The enclosing transaction was rolled back.
    #[error("Database error: {0}")]
    DatabaseError(#[from] airwave_db::DbError),

    /// A record could not be mapped to a station.
    #[error("Codec error: {0}")]
    Codec(#[from] CoreError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Notification Errors
    // =========================================================================
    /// A push notification had an unexpected shape.
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A graph operation panicked.
    #[error("Operation '{0}' panicked")]
    OperationPanicked(String),

    /// An operation's upstream produced nothing to work on.
    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    /// The coordinator is shutting down.
    #[error("Sync coordinator is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if a later trigger is expected to succeed.
    ///
    /// The coordinator never schedules retries itself; this only decides
    /// how loudly a failure is logged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_transient(),
            SyncError::PushRejected { first, .. } => first.is_transient(),
            SyncError::DatabaseError(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_remote_errors() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::RateLimited { retry_after_secs: 3 }.is_transient());
        assert!(RemoteError::ZoneBusy(ZoneId::new("RadioZone")).is_transient());

        assert!(!RemoteError::ChangeTokenExpired.is_transient());
        assert!(!RemoteError::NotAuthenticated.is_transient());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::from(RemoteError::Timeout).is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::InvalidNotification("no scope".into()).is_retryable());
        assert!(SyncError::from(airwave_db::DbError::Busy("locked".into())).is_retryable());
        assert!(!SyncError::PushRejected {
            rejected: 1,
            first: RemoteError::ZoneNotFound(ZoneId::new("RadioZone")),
        }
        .is_retryable());
        assert!(SyncError::ConfigSaveFailed("disk".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::from(RemoteError::RecordNotFound(RecordId::new(
            "ABC",
            ZoneId::new("RadioZone"),
        )));
        assert!(err.to_string().contains("ABC"));
    }
}
