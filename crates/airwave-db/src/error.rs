//! # Local Store Errors
//!
//! ```text
//! sqlx::Error ────────┐
//! MigrateError ───────┼──► DbError ──► SyncError::DatabaseError (airwave-sync)
//! CoreError ──────────┘
//! ```
//!
//! Every repository write runs in a transaction, so any `DbError` returned
//! from a write means nothing was committed.

use airwave_core::{CoreError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write, e.g. two stations with one record name.
    #[error("Unique constraint failed on {table}.{column}")]
    UniqueViolation { table: String, column: String },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Input rejected before it reached SQL.
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// A stored identity or token blob could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Codec(String),

    /// Another writer held the lock past `busy_timeout`.
    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    /// True when the same call may succeed later without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

/// Splits "UNIQUE constraint failed: stations.record_name" into its parts.
fn unique_target(message: &str) -> (String, String) {
    let target = message
        .split_once("UNIQUE constraint failed: ")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    // Composite indexes list several columns; the first one names the table.
    let first = target.split(',').next().unwrap_or_default().trim();
    match first.split_once('.') {
        Some((table, column)) => (table.to_string(), column.to_string()),
        None => ("unknown".to_string(), first.to_string()),
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message();
                if message.contains("UNIQUE constraint failed") {
                    let (table, column) = unique_target(message);
                    DbError::UniqueViolation { table, column }
                } else if message.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation(message.to_string())
                } else if message.contains("database is locked") || message.contains("database is busy") {
                    DbError::Busy(message.to_string())
                } else {
                    DbError::QueryFailed(message.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::Busy("no free connection".to_string()),
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            other => DbError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => DbError::Validation(v),
            other => DbError::Codec(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
