//! # Repository Module
//!
//! Database repository implementations for the Airwave local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Host UI                              Sync engine (airwave-sync)       │
//! │     │                                    │                              │
//! │     │ db.stations().update(..)           │ db.remote_apply().apply(..) │
//! │     ▼                                    ▼                              │
//! │  StationRepository               RemoteApplyRepository                 │
//! │  ├── create / update / delete    ├── upserts, deletes, zones          │
//! │  └── (+ PendingMutation row)     ├── identities                        │
//! │                                  └── (+ SyncState, discards)          │
//! │     │                                    │                              │
//! │     └──────────────┬─────────────────────┘                              │
//! │                    ▼                                                    │
//! │              SQLite Database                                            │
//! │                                                                         │
//! │  Cross-repository transactions share one connection: the connection-   │
//! │  level helpers (`*_in`) take `&mut SqliteConnection` from an open tx.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StationRepository`](station::StationRepository) - Station CRUD with outbox capture
//! - [`PendingMutationRepository`](pending::PendingMutationRepository) - Outbox snapshot/discard
//! - [`SyncStateRepository`](sync_state::SyncStateRepository) - Change tokens, flags, timestamps
//! - [`RemoteApplyRepository`](remote_apply::RemoteApplyRepository) - Atomic write-set apply

pub mod pending;
pub mod remote_apply;
pub mod station;
pub mod sync_state;
