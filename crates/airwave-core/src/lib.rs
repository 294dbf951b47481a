//! # airwave-core: Pure Sync Logic for Airwave
//!
//! This crate holds every sync decision that can be made without touching a
//! disk or a network: how a station maps onto a remote record, which zones and
//! subscriptions must exist, and how local and remote changes are merged.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Airwave Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              airwave-sync (coordinator, operation graph)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ airwave-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │ station │ │  codec  │ │  zones  │ │  subs   │ │reconcile│  │   │
//! │  │   │ record  │ │  blob   │ │         │ │         │ │mutation │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  airwave-db (Local Store Gateway)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`station`] - The local Station entity
//! - [`record`] - Remote record shapes (RecordId, ZoneId, ChangeToken)
//! - [`codec`] - Station ↔ record field projection
//! - [`blob`] - Versioned envelope for persisted identities and tokens
//! - [`zones`] - Zone reconciler
//! - [`subscriptions`] - Subscription reconciler
//! - [`mutation`] - Pending mutation capture and coalescing
//! - [`reconcile`] - Reconciliation engine
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use airwave_core::codec::{decode_station, encode_station};
//! use airwave_core::record::{RecordId, ZoneId};
//! use airwave_core::station::StationFields;
//!
//! let fields = StationFields::new("NPO Radio 2").with_url("https://icecast.omroep.nl/radio2-bb-mp3");
//! let record = encode_station(&fields, RecordId::generate(ZoneId::new("RadioZone")));
//!
//! let decoded = decode_station(&record).unwrap();
//! assert_eq!(decoded.fields, fields);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod blob;
pub mod codec;
pub mod error;
pub mod mutation;
pub mod reconcile;
pub mod record;
pub mod station;
pub mod subscriptions;
pub mod validation;
pub mod zones;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use mutation::{MutationKind, PendingMutation, PendingMutationSet};
pub use record::{ChangeToken, DatabaseScope, FieldValue, RecordId, RemoteRecord, ZoneId};
pub use station::{Station, StationFields};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Record type under which stations are stored remotely.
pub const STATION_RECORD_TYPE: &str = "Station";

/// Name of the zone every remote database starts with.
pub const DEFAULT_ZONE_NAME: &str = "_defaultZone";

/// Owner placeholder the remote store resolves to the signed-in user.
pub const CURRENT_USER_OWNER: &str = "__defaultOwner__";
