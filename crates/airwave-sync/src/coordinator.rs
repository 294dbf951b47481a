//! # Sync Coordinator
//!
//! Turns triggers into graph runs.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  app_start()                 public  query → apply → subscriptions     │
//! │                              private bootstrap zones + subscriptions,  │
//! │                                      then fetch (token-less until the  │
//! │                                      first clean cycle) → push         │
//! │  resync()                    public + private, stored tokens           │
//! │  local_changes_committed()   private only, stored tokens               │
//! │  handle_notification(json)   one record, fetch-and-apply or delete     │
//! │                                                                         │
//! │  Every trigger returns a TriggerHandle at once. The work runs on a     │
//! │  spawned task; an activity stays open until it is done.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scope Leases
//! Each scope has one lease. Work for the same scope queues behind the
//! running cycle; public and private work runs side by side.

use std::fmt;
use std::sync::Arc;

use airwave_core::DatabaseScope;
use airwave_db::Database;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::executor::{ActivityTracker, Executor, GraphReport, OpStatus, OperationGraph, Priority};
use crate::notifications::{build_notification_graph, Notification};
use crate::pipeline::private::{build_private_graph, PrivateCycle};
use crate::pipeline::public::build_public_graph;
use crate::pipeline::SyncContext;
use crate::remote::RemoteStore;
use crate::status::{NoOpEmitter, StatusReporter, SyncEventEmitter, SyncStatus};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    AppStart,
    Resync,
    LocalCommit,
    Notification,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::AppStart => "app_start",
            Trigger::Resync => "resync",
            Trigger::LocalCommit => "local_commit",
            Trigger::Notification => "notification",
        };
        f.write_str(name)
    }
}

/// Graphs one trigger ran.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub trigger: Trigger,
    pub graphs: Vec<GraphReport>,
}

impl TriggerReport {
    pub fn all_succeeded(&self) -> bool {
        self.graphs.iter().all(GraphReport::all_succeeded)
    }

    pub fn graph(&self, name: &str) -> Option<&GraphReport> {
        self.graphs.iter().find(|g| g.graph == name)
    }
}

/// Handle to a trigger's background work.
#[derive(Debug)]
pub struct TriggerHandle {
    trigger: Trigger,
    join: JoinHandle<SyncResult<TriggerReport>>,
}

impl TriggerHandle {
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the trigger's work to finish.
    pub async fn wait(self) -> SyncResult<TriggerReport> {
        self.join
            .await
            .map_err(|e| SyncError::Internal(format!("trigger task failed: {}", e)))?
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Inner {
    config: SyncConfig,
    ctx: SyncContext,
    executor: Executor,
    public_lease: Arc<Mutex<()>>,
    private_lease: Arc<Mutex<()>>,
}

/// Orchestrates sync for both scopes. Cheap to clone.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn builder(config: SyncConfig) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder::new(config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &Database {
        &self.inner.ctx.db
    }

    pub fn activity(&self) -> &ActivityTracker {
        self.inner.executor.activity()
    }

    pub async fn status(&self) -> SyncStatus {
        self.inner.ctx.status.snapshot().await
    }

    /// Resolves once no trigger or graph is in flight.
    pub async fn wait_idle(&self) {
        self.activity().wait_idle().await;
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Cold start: bootstrap zones and subscriptions, then a full cycle.
    pub fn app_start(&self) -> TriggerHandle {
        self.dispatch(Trigger::AppStart, None)
    }

    /// Periodic or manual resync of both scopes.
    pub fn resync(&self) -> TriggerHandle {
        self.dispatch(Trigger::Resync, None)
    }

    /// Pushes local edits after a local transaction committed.
    pub fn local_changes_committed(&self) -> TriggerHandle {
        self.dispatch(Trigger::LocalCommit, None)
    }

    /// Handles a raw push notification payload.
    pub fn handle_notification(&self, payload: impl Into<String>) -> TriggerHandle {
        self.dispatch(Trigger::Notification, Some(payload.into()))
    }

    fn dispatch(&self, trigger: Trigger, payload: Option<String>) -> TriggerHandle {
        let guard = self.activity().begin(format!("{} trigger", trigger));
        let inner = self.inner.clone();

        let join = tokio::spawn(async move {
            let _guard = guard;
            inner.ctx.status.trigger_received().await;
            let result = inner.run_trigger(trigger, payload).await;
            if let Err(e) = &result {
                warn!(trigger = %trigger, error = %e, "Trigger abandoned");
            }
            result
        });

        TriggerHandle { trigger, join }
    }
}

impl Inner {
    async fn run_trigger(&self, trigger: Trigger, payload: Option<String>) -> SyncResult<TriggerReport> {
        let mut report = TriggerReport {
            trigger,
            graphs: Vec::new(),
        };

        let mode = self.config.mode();
        if !mode.is_sync_enabled() {
            debug!(trigger = %trigger, "Sync disabled; trigger ignored");
            return Ok(report);
        }
        let include_private = mode.syncs_private();

        match trigger {
            Trigger::AppStart | Trigger::Resync => {
                let bootstrap = trigger == Trigger::AppStart;
                let priority = if bootstrap {
                    Priority::UserInitiated
                } else {
                    Priority::Background
                };

                let (public, private) = tokio::join!(
                    self.run_public(bootstrap, priority),
                    async {
                        if include_private {
                            self.run_private(bootstrap, priority).await.map(Some)
                        } else {
                            Ok(None)
                        }
                    }
                );
                report.graphs.push(public);
                report.graphs.extend(private?);
            }
            Trigger::LocalCommit => {
                if include_private {
                    report.graphs.push(self.run_private(false, Priority::UserInitiated).await?);
                }
            }
            Trigger::Notification => {
                let notification = Notification::parse(payload.as_deref().unwrap_or_default())?;
                if notification.scope == DatabaseScope::Private && !include_private {
                    debug!("Private notification ignored in public-only mode");
                    return Ok(report);
                }
                report.graphs.push(self.run_notification(notification).await);
            }
        }

        Ok(report)
    }

    fn lease(&self, scope: DatabaseScope) -> Arc<Mutex<()>> {
        match scope {
            DatabaseScope::Public => self.public_lease.clone(),
            DatabaseScope::Private => self.private_lease.clone(),
        }
    }

    async fn run_public(&self, bootstrap: bool, priority: Priority) -> GraphReport {
        let _lease = self.lease(DatabaseScope::Public).lock_owned().await;
        let graph = build_public_graph(&self.ctx, bootstrap, priority);
        self.run_graph(DatabaseScope::Public, graph).await
    }

    async fn run_private(&self, bootstrap: bool, priority: Priority) -> SyncResult<GraphReport> {
        let _lease = self.lease(DatabaseScope::Private).lock_owned().await;

        let initial_done = self.ctx.db.sync_state().initial_private_sync_performed().await?;
        self.ctx.status.set_initial_private_sync_performed(initial_done).await;

        let cycle = PrivateCycle {
            bootstrap,
            cold: bootstrap && !initial_done,
            priority,
        };
        if cycle.cold {
            info!("Initial private sync not performed yet; fetching without tokens");
        }

        let graph = build_private_graph(&self.ctx, cycle);
        let report = self.run_graph(DatabaseScope::Private, graph).await;

        match self.ctx.db.pending_mutations().count_pending().await {
            Ok(pending) => self.ctx.status.set_pending_count(pending).await,
            Err(e) => warn!(error = %e, "Could not count pending mutations"),
        }
        Ok(report)
    }

    async fn run_notification(&self, notification: Notification) -> GraphReport {
        let scope = notification.scope;
        let _lease = self.lease(scope).lock_owned().await;
        let graph = build_notification_graph(&self.ctx, notification);
        self.run_graph(scope, graph).await
    }

    async fn run_graph(&self, scope: DatabaseScope, graph: OperationGraph) -> GraphReport {
        let report = self.executor.run(graph).await;

        let error = report.first_error().map(|message| {
            let retryable = report
                .failures()
                .any(|op| matches!(op.status, OpStatus::Failed { retryable: true, .. }));
            (message, retryable)
        });

        match &error {
            Some((message, retryable)) => {
                if *retryable {
                    warn!(graph = %report.graph, error = %message, "Sync cycle incomplete; next trigger retries");
                } else {
                    error!(graph = %report.graph, error = %message, "Sync cycle failed");
                }
            }
            None => info!(
                graph = %report.graph,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Sync cycle completed"
            ),
        }

        self.ctx.status.cycle_finished(scope, error).await;
        report
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncCoordinator.
pub struct SyncCoordinatorBuilder {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<dyn RemoteStore>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    activity: Option<ActivityTracker>,
}

impl SyncCoordinatorBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncCoordinatorBuilder {
            config,
            db: None,
            remote: None,
            emitter: None,
            activity: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Shares an activity tracker with the host.
    pub fn with_activity(mut self, activity: ActivityTracker) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn build(self) -> SyncResult<SyncCoordinator> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let activity = self.activity.unwrap_or_default();

        let status = StatusReporter::new(self.config.mode(), emitter);
        let executor = Executor::with_activity(self.config.sync.max_concurrent_operations, activity);
        let ctx = SyncContext::new(db, remote, self.config.sync.clone(), status);

        info!(
            mode = %self.config.mode(),
            lanes = executor.max_lanes(),
            container = %self.config.container.identifier,
            "Sync coordinator ready"
        );

        Ok(SyncCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                ctx,
                executor,
                public_lease: Arc::new(Mutex::new(())),
                private_lease: Arc::new(Mutex::new(())),
            }),
        })
    }
}

// =============================================================================
// Scenario Tests
// =============================================================================
