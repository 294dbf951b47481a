//! # airwave-db: Local Store Gateway for Airwave
//!
//! This crate provides the local persistent store the sync engine reads from
//! and writes to. It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Airwave Data Flow                                │
//! │                                                                         │
//! │  Host UI edit                      Sync cycle (airwave-sync)           │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    airwave-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StationRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ PendingRepo   │    │ 001_init.sql │  │   │
//! │  │   │ Connection    │    │ SyncStateRepo │    │              │  │   │
//! │  │   │ Management    │    │ RemoteApply   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use airwave_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/airwave.db")).await?;
//!
//! let station = db.stations().create(StationFields::new("Radio 1")).await?;
//! let pending = db.pending_mutations().count_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbLocation};

// Repository re-exports for convenience
pub use repository::pending::PendingMutationRepository;
pub use repository::remote_apply::{ApplySummary, LocalWriteSet, RemoteApplyRepository};
pub use repository::station::StationRepository;
pub use repository::sync_state::{StateUpdate, SyncStateKey, SyncStateRepository};
