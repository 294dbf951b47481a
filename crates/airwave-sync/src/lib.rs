//! # airwave-sync: Sync Engine for Airwave
//!
//! Keeps the local station store in step with the remote record store,
//! for the public scope (server-seeded stations, query based) and the
//! private scope (user stations, change-feed based with push).
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncCoordinator (Main Orchestrator)              │  │
//! │  │                                                                  │  │
//! │  │  Triggers: app start, resync, local commit, notification        │  │
//! │  │  One lease per scope; public and private run in parallel        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ builds                                  │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Private graph  │  │ Public graph   │  │ Notification graph     │    │
//! │  │                │  │                │  │                        │    │
//! │  │ zones, subs,   │  │ query since    │  │ fetch one record and   │    │
//! │  │ feeds,         │  │ lower bound,   │  │ apply, or delete one   │    │
//! │  │ reconcile,     │  │ apply, subs    │  │                        │    │
//! │  │ apply, push    │  │                │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  Executor: dependency-ordered operations on bounded lanes        │  │
//! │  │  ActivityTracker: keep-alive marks while work is in flight       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ RemoteStore    │  │ ChangeFetcher  │  │ airwave-db             │    │
//! │  │ (trait +       │  │ paged database │  │ atomic apply of        │    │
//! │  │ in-memory)     │  │ + zone feeds   │  │ records and tokens     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS (to the host via SyncEventEmitter):                      │
//! │  • phase changes per scope                                              │
//! │  • status snapshot at the end of each cycle                             │
//! │  • errors with their retryability                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - `SyncCoordinator` and trigger handling
//! - [`pipeline`] - Stage builders for the private and public graphs
//! - [`notifications`] - Push notification parsing and handling
//! - [`executor`] - Operation graph executor and activity tracking
//! - [`fetcher`] - Change feed walking with continuation paging
//! - [`remote`] - Remote store gateway trait and in-memory store
//! - [`scheduler`] - Periodic resync
//! - [`status`] - Phases, status snapshot and event emitter
//! - [`config`] - Sync configuration (mode, database path, batch sizes)
//! - [`error`] - Sync and remote error types
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use airwave_db::{Database, DbConfig};
//! use airwave_sync::{ResyncScheduler, SyncConfig, SyncCoordinator};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let coordinator = SyncCoordinator::builder(config)
//!     .with_database(db)
//!     .with_remote(remote)
//!     .build()?;
//!
//! coordinator.app_start();
//! let scheduler = ResyncScheduler::spawn(coordinator.clone());
//!
//! // After the user edits a station:
//! coordinator.local_changes_committed();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod logging;
pub mod notifications;
pub mod pipeline;
pub mod remote;
pub mod scheduler;
pub mod status;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{SyncConfig, SyncMode, SyncSettings};
pub use coordinator::{SyncCoordinator, SyncCoordinatorBuilder, Trigger, TriggerHandle, TriggerReport};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use executor::{ActivityTracker, Executor, GraphReport, OperationGraph, Priority};
pub use fetcher::{ChangeFetcher, DatabaseChanges, ZoneChanges};
pub use notifications::{Notification, NotificationReason};
pub use remote::{InMemoryRemoteStore, RemoteStore};
pub use scheduler::{ResyncScheduler, SchedulerHandle};
pub use status::{NoOpEmitter, SyncEventEmitter, SyncPhase, SyncStatus};
