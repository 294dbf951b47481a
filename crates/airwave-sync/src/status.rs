//! # Sync Status
//!
//! Per-scope phase tracking and the event surface hosts observe.
//!
//! ## Phases
//! ```text
//! private:  Idle → BootstrappingZones → ReconcilingSubscriptions
//!                → FetchingChanges → Reconciling → PushingLocalChanges → Idle
//!           Idle → FetchingChanges (incremental cycles skip the bootstrap)
//!
//! public:   Idle → FetchingPublicChanges → ApplyingPublicChanges → Idle
//!
//! Any phase may fall back to Idle when a cycle ends early.
//! ```

use std::fmt;
use std::sync::Arc;

use airwave_core::DatabaseScope;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::SyncMode;

// =============================================================================
// Sync Phase
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    BootstrappingZones,
    ReconcilingSubscriptions,
    FetchingChanges,
    Reconciling,
    PushingLocalChanges,
    FetchingPublicChanges,
    ApplyingPublicChanges,
}

impl SyncPhase {
    /// Scope a non-idle phase belongs to.
    pub fn scope(&self) -> Option<DatabaseScope> {
        match self {
            SyncPhase::Idle => None,
            SyncPhase::FetchingPublicChanges | SyncPhase::ApplyingPublicChanges => {
                Some(DatabaseScope::Public)
            }
            _ => Some(DatabaseScope::Private),
        }
    }

    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;

        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, BootstrappingZones)
                | (Idle, FetchingChanges)
                | (BootstrappingZones, ReconcilingSubscriptions)
                | (ReconcilingSubscriptions, FetchingChanges)
                | (FetchingChanges, Reconciling)
                | (Reconciling, PushingLocalChanges)
                | (Idle, FetchingPublicChanges)
                | (FetchingPublicChanges, ApplyingPublicChanges)
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::BootstrappingZones => "bootstrapping_zones",
            SyncPhase::ReconcilingSubscriptions => "reconciling_subscriptions",
            SyncPhase::FetchingChanges => "fetching_changes",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::PushingLocalChanges => "pushing_local_changes",
            SyncPhase::FetchingPublicChanges => "fetching_public_changes",
            SyncPhase::ApplyingPublicChanges => "applying_public_changes",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub mode: SyncMode,

    pub private_phase: SyncPhase,

    pub public_phase: SyncPhase,

    /// Last error message, cleared by the next clean cycle of its scope.
    pub last_error: Option<String>,

    pub last_error_scope: Option<DatabaseScope>,

    /// End of the last cycle that finished without errors.
    pub last_sync_at: Option<DateTime<Utc>>,

    pub cycles_completed: u64,

    pub triggers_handled: u64,

    pub initial_private_sync_performed: bool,

    /// Local mutations still waiting for a push.
    pub pending_count: i64,
}

impl SyncStatus {
    pub fn phase(&self, scope: DatabaseScope) -> SyncPhase {
        match scope {
            DatabaseScope::Public => self.public_phase,
            DatabaseScope::Private => self.private_phase,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.private_phase == SyncPhase::Idle && self.public_phase == SyncPhase::Idle
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events (implemented by the host application).
pub trait SyncEventEmitter: Send + Sync {
    fn emit_phase(&self, scope: DatabaseScope, phase: SyncPhase);

    fn emit_status(&self, status: &SyncStatus);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_phase(&self, _scope: DatabaseScope, _phase: SyncPhase) {}
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Status Reporter
// =============================================================================

/// Shared handle the pipeline stages report through.
#[derive(Clone)]
pub struct StatusReporter {
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl StatusReporter {
    pub fn new(mode: SyncMode, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let status = SyncStatus {
            mode,
            ..Default::default()
        };
        StatusReporter {
            status: Arc::new(RwLock::new(status)),
            emitter,
        }
    }

    pub async fn snapshot(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Moves a scope to `phase`. Invalid transitions are logged and ignored.
    pub async fn enter(&self, scope: DatabaseScope, phase: SyncPhase) {
        if phase.scope().is_some_and(|owner| owner != scope) {
            warn!(scope = %scope, phase = %phase, "Phase does not belong to scope");
            return;
        }

        let mut status = self.status.write().await;
        let slot = match scope {
            DatabaseScope::Public => &mut status.public_phase,
            DatabaseScope::Private => &mut status.private_phase,
        };

        if *slot == phase {
            return;
        }
        if !slot.can_transition_to(phase) {
            warn!(scope = %scope, from = %slot, to = %phase, "Invalid phase transition ignored");
            return;
        }

        debug!(scope = %scope, from = %slot, to = %phase, "Sync phase changed");
        *slot = phase;
        drop(status);

        self.emitter.emit_phase(scope, phase);
    }

    pub async fn trigger_received(&self) {
        self.status.write().await.triggers_handled += 1;
    }

    /// Records the end of one scope cycle.
    pub async fn cycle_finished(&self, scope: DatabaseScope, error: Option<(String, bool)>) {
        self.enter(scope, SyncPhase::Idle).await;

        let snapshot = {
            let mut status = self.status.write().await;
            status.cycles_completed += 1;
            match &error {
                Some((message, _)) => {
                    status.last_error = Some(message.clone());
                    status.last_error_scope = Some(scope);
                }
                None => {
                    if status.last_error_scope == Some(scope) {
                        status.last_error = None;
                        status.last_error_scope = None;
                    }
                    status.last_sync_at = Some(Utc::now());
                }
            }
            status.clone()
        };

        if let Some((message, retryable)) = error {
            self.emitter.emit_error(&message, retryable);
        }
        self.emitter.emit_status(&snapshot);
    }

    pub async fn set_initial_private_sync_performed(&self, performed: bool) {
        self.status.write().await.initial_private_sync_performed = performed;
    }

    pub async fn set_pending_count(&self, pending: i64) {
        self.status.write().await.pending_count = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        phases: Mutex<Vec<(DatabaseScope, SyncPhase)>>,
        errors: Mutex<Vec<String>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_phase(&self, scope: DatabaseScope, phase: SyncPhase) {
            self.phases.lock().unwrap().push((scope, phase));
        }
        fn emit_status(&self, _status: &SyncStatus) {}
        fn emit_error(&self, message: &str, _retryable: bool) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_transitions() {
        use SyncPhase::*;
        assert!(Idle.can_transition_to(BootstrappingZones));
        assert!(Idle.can_transition_to(FetchingChanges));
        assert!(Reconciling.can_transition_to(PushingLocalChanges));
        assert!(PushingLocalChanges.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(PushingLocalChanges));
        assert!(!FetchingPublicChanges.can_transition_to(Reconciling));
    }

    #[test]
    fn test_status_default() {
        let status = SyncStatus::default();
        assert!(status.is_idle());
        assert_eq!(status.mode, SyncMode::Full);
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test]
    async fn test_reporter_ignores_invalid_transition() {
        let emitter = Arc::new(RecordingEmitter::default());
        let reporter = StatusReporter::new(SyncMode::Full, emitter.clone());

        reporter.enter(DatabaseScope::Private, SyncPhase::FetchingChanges).await;
        reporter.enter(DatabaseScope::Private, SyncPhase::BootstrappingZones).await;
        reporter.enter(DatabaseScope::Private, SyncPhase::FetchingPublicChanges).await;

        let status = reporter.snapshot().await;
        assert_eq!(status.private_phase, SyncPhase::FetchingChanges);
        assert_eq!(status.public_phase, SyncPhase::Idle);
        assert_eq!(emitter.phases.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_finished_tracks_errors() {
        let emitter = Arc::new(RecordingEmitter::default());
        let reporter = StatusReporter::new(SyncMode::Full, emitter.clone());

        reporter.enter(DatabaseScope::Public, SyncPhase::FetchingPublicChanges).await;
        reporter
            .cycle_finished(DatabaseScope::Public, Some(("query: timeout".into(), true)))
            .await;

        let status = reporter.snapshot().await;
        assert_eq!(status.public_phase, SyncPhase::Idle);
        assert_eq!(status.last_error.as_deref(), Some("query: timeout"));
        assert!(status.last_sync_at.is_none());

        // A clean cycle of the other scope leaves the error alone.
        reporter.cycle_finished(DatabaseScope::Private, None).await;
        assert!(reporter.snapshot().await.last_error.is_some());

        reporter.cycle_finished(DatabaseScope::Public, None).await;
        let status = reporter.snapshot().await;
        assert!(status.last_error.is_none());
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.cycles_completed, 3);
        assert_eq!(emitter.errors.lock().unwrap().len(), 1);
    }
}
