//! # Operation Graph Executor
//!
//! Runs a set of asynchronous operations honoring declared dependency
//! edges, on a bounded number of parallel lanes.
//!
//! ## Execution Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Operation Graph Execution                          │
//! │                                                                         │
//! │   zones_fetch ──► zones_plan ──► zones_modify ──┐                       │
//! │                                                 ▼                       │
//! │                          db_changes ──► zone_changes ──┐                │
//! │                                                        ▼                │
//! │   local_snapshot ───────────────────────────────► reconcile ──► ...     │
//! │                                                                         │
//! │  • An operation starts once every dependency has FINISHED, whether it   │
//! │    succeeded or not. Dependents inspect their input slots and give up   │
//! │    if a producer left nothing behind.                                   │
//! │  • Ready operations are started highest priority first, as lanes       │
//! │    (semaphore permits shared by every graph on this executor) free up. │
//! │  • Errors and panics never cross operation boundaries: they are logged │
//! │    and recorded in the GraphReport.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dependencies can only name operations added earlier, so every graph is
//! acyclic by construction.

mod activity;
mod slot;

pub use activity::{ActivityGuard, ActivityTracker};
pub use slot::Slot;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::SyncResult;

/// Boxed body of an operation.
pub type OperationFuture = BoxFuture<'static, SyncResult<()>>;

type OperationBody = Box<dyn FnOnce() -> OperationFuture + Send>;

// =============================================================================
// Graph Definition
// =============================================================================

/// Handle to an operation inside one [`OperationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(usize);

impl OpId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Scheduling hint. Higher priorities start first when lanes are scarce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Background,
    #[default]
    Utility,
    UserInitiated,
}

struct Operation {
    name: String,
    priority: Priority,
    deps: Vec<OpId>,
    body: OperationBody,
}

/// A declarative set of operations and their dependency edges.
pub struct OperationGraph {
    name: String,
    ops: Vec<Operation>,
    keep_alive: Option<String>,
}

impl std::fmt::Debug for OperationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGraph")
            .field("name", &self.name)
            .field("operations", &self.ops.iter().map(|op| &op.name).collect::<Vec<_>>())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl OperationGraph {
    pub fn new(name: impl Into<String>) -> Self {
        OperationGraph {
            name: name.into(),
            ops: Vec::new(),
            keep_alive: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Wraps the whole graph in a keep-alive activity, opened when the graph
    /// is submitted and closed when its last operation finishes.
    pub fn keep_alive(&mut self, reason: impl Into<String>) -> &mut Self {
        self.keep_alive = Some(reason.into());
        self
    }

    /// Adds an operation that starts after every operation in `deps`.
    pub fn add<F, Fut>(
        &mut self,
        name: impl Into<String>,
        priority: Priority,
        deps: &[OpId],
        body: F,
    ) -> OpId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let id = OpId(self.ops.len());
        let name = name.into();

        let mut valid = Vec::with_capacity(deps.len());
        for dep in deps {
            if dep.0 < id.0 && !valid.contains(dep) {
                valid.push(*dep);
            } else {
                warn!(graph = %self.name, operation = %name, dependency = dep.0, "Ignoring invalid dependency");
            }
        }

        self.ops.push(Operation {
            name,
            priority,
            deps: valid,
            body: Box::new(move || body().boxed()),
        });
        id
    }

    /// Names of the operations, in insertion order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| op.name.as_str())
    }

    pub fn dependencies(&self, id: OpId) -> &[OpId] {
        self.ops.get(id.0).map(|op| op.deps.as_slice()).unwrap_or(&[])
    }
}

// =============================================================================
// Reports
// =============================================================================

/// How one operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    Succeeded,
    Failed { message: String, retryable: bool },
    Panicked,
    /// Never started (the executor shut down under it).
    Abandoned,
}

impl OpStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OpStatus::Succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct OpReport {
    pub name: String,
    pub status: OpStatus,
    pub elapsed: Duration,
}

/// Outcome of every operation in a graph run.
#[derive(Debug, Clone)]
pub struct GraphReport {
    pub graph: String,
    pub operations: Vec<OpReport>,
    pub elapsed: Duration,
}

impl GraphReport {
    pub fn status(&self, name: &str) -> Option<&OpStatus> {
        self.operations
            .iter()
            .find(|op| op.name == name)
            .map(|op| &op.status)
    }

    pub fn succeeded(&self, name: &str) -> bool {
        self.status(name).is_some_and(OpStatus::is_success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.operations.iter().all(|op| op.status.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &OpReport> {
        self.operations.iter().filter(|op| !op.status.is_success())
    }

    /// First failure, formatted for status surfaces.
    pub fn first_error(&self) -> Option<String> {
        self.failures().next().map(|op| match &op.status {
            OpStatus::Failed { message, .. } => format!("{}: {}", op.name, message),
            OpStatus::Panicked => format!("{}: panicked", op.name),
            _ => format!("{}: not run", op.name),
        })
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs operation graphs on a fixed number of lanes.
#[derive(Debug, Clone)]
pub struct Executor {
    lanes: Arc<Semaphore>,
    max_lanes: usize,
    activity: ActivityTracker,
}

impl Executor {
    pub fn new(max_lanes: usize) -> Self {
        Self::with_activity(max_lanes, ActivityTracker::new())
    }

    pub fn with_activity(max_lanes: usize, activity: ActivityTracker) -> Self {
        let max_lanes = max_lanes.max(1);
        Executor {
            lanes: Arc::new(Semaphore::new(max_lanes)),
            max_lanes,
            activity,
        }
    }

    pub fn max_lanes(&self) -> usize {
        self.max_lanes
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    /// Submits a graph and returns without waiting for it.
    pub fn spawn(&self, mut graph: OperationGraph) -> JoinHandle<GraphReport> {
        let guard = graph.keep_alive.take().map(|reason| self.activity.begin(reason));
        let executor = self.clone();
        tokio::spawn(async move { executor.drive(graph, guard).await })
    }

    /// Runs a graph to completion.
    pub async fn run(&self, mut graph: OperationGraph) -> GraphReport {
        let guard = graph.keep_alive.take().map(|reason| self.activity.begin(reason));
        self.drive(graph, guard).await
    }

    async fn drive(&self, graph: OperationGraph, _activity: Option<ActivityGuard>) -> GraphReport {
        let started = Instant::now();
        let graph_name: Arc<str> = Arc::from(graph.name.as_str());
        let total = graph.ops.len();

        let mut reports = Vec::with_capacity(total);
        let mut priorities = Vec::with_capacity(total);
        let mut waiting = Vec::with_capacity(total);
        let mut bodies = Vec::with_capacity(total);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];

        for (index, op) in graph.ops.into_iter().enumerate() {
            for dep in &op.deps {
                dependents[dep.0].push(index);
            }
            reports.push(OpReport {
                name: op.name,
                status: OpStatus::Abandoned,
                elapsed: Duration::ZERO,
            });
            priorities.push(op.priority);
            waiting.push(op.deps.len());
            bodies.push(Some(op.body));
        }

        let mut ready: BinaryHeap<(Priority, Reverse<usize>)> = waiting
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(index, _)| (priorities[index], Reverse(index)))
            .collect();
        let mut running: JoinSet<(usize, OpStatus, Duration)> = JoinSet::new();

        debug!(graph = %graph_name, operations = total, "Graph started");

        loop {
            while let Some(&(_, Reverse(index))) = ready.peek() {
                let Ok(permit) = self.lanes.clone().try_acquire_owned() else {
                    break;
                };
                ready.pop();
                if let Some(body) = bodies[index].take() {
                    launch(&mut running, &graph_name, index, &reports[index].name, body, permit);
                }
            }

            if running.is_empty() {
                let Some(&(_, Reverse(index))) = ready.peek() else {
                    break;
                };
                // Every lane is held by another graph.
                let Ok(permit) = self.lanes.clone().acquire_owned().await else {
                    error!(graph = %graph_name, "Executor lanes closed");
                    break;
                };
                ready.pop();
                if let Some(body) = bodies[index].take() {
                    launch(&mut running, &graph_name, index, &reports[index].name, body, permit);
                }
                continue;
            }

            match running.join_next().await {
                Some(Ok((index, status, elapsed))) => {
                    reports[index].status = status;
                    reports[index].elapsed = elapsed;
                    for &next in &dependents[index] {
                        waiting[next] -= 1;
                        if waiting[next] == 0 {
                            ready.push((priorities[next], Reverse(next)));
                        }
                    }
                }
                Some(Err(err)) => {
                    error!(graph = %graph_name, error = %err, "Operation task failed to join");
                }
                None => break,
            }
        }

        let report = GraphReport {
            graph: graph_name.to_string(),
            operations: reports,
            elapsed: started.elapsed(),
        };

        debug!(
            graph = %report.graph,
            failed = report.failures().count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Graph finished"
        );
        report
    }
}

fn launch(
    running: &mut JoinSet<(usize, OpStatus, Duration)>,
    graph: &Arc<str>,
    index: usize,
    name: &str,
    body: OperationBody,
    permit: OwnedSemaphorePermit,
) {
    let graph = graph.clone();
    let name = name.to_string();

    running.spawn(async move {
        let _permit = permit;
        let started = Instant::now();
        debug!(graph = %graph, operation = %name, "Operation started");

        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Ok(())) => {
                debug!(graph = %graph, operation = %name, "Operation finished");
                OpStatus::Succeeded
            }
            Ok(Err(err)) => {
                let retryable = err.is_retryable();
                if retryable {
                    warn!(graph = %graph, operation = %name, error = %err, "Operation failed (transient)");
                } else {
                    error!(graph = %graph, operation = %name, error = %err, "Operation failed");
                }
                OpStatus::Failed {
                    message: err.to_string(),
                    retryable,
                }
            }
            Err(_) => {
                error!(graph = %graph, operation = %name, "Operation panicked");
                OpStatus::Panicked
            }
        };

        (index, status, started.elapsed())
    });
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<&'static str>>>;

    fn logging_op(log: &Log, name: &'static str) -> impl FnOnce() -> BoxFuture<'static, SyncResult<()>> {
        let log = log.clone();
        move || {
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push(name);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_dependencies_are_honored() {
        let log: Log = Arc::default();
        let mut graph = OperationGraph::new("deps");

        let a = graph.add("a", Priority::Utility, &[], logging_op(&log, "a"));
        let b = graph.add("b", Priority::Utility, &[a], logging_op(&log, "b"));
        let c = graph.add("c", Priority::Utility, &[a], logging_op(&log, "c"));
        graph.add("d", Priority::Utility, &[b, c], logging_op(&log, "d"));

        let report = Executor::new(4).run(graph).await;
        assert!(report.all_succeeded());

        let order = log.lock().unwrap().clone();
        assert_eq!(order.first(), Some(&"a"));
        assert_eq!(order.last(), Some(&"d"));
        assert_eq!(order.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_dependency_still_runs_dependents() {
        let slot: Slot<u32> = Slot::new();
        let observed = Arc::new(AtomicUsize::new(99));
        let mut graph = OperationGraph::new("failure");

        let producer = graph.add("produce", Priority::Utility, &[], || async {
            Err(SyncError::Internal("boom".into()))
        });
        graph.add("consume", Priority::Utility, &[producer], {
            let slot = slot.clone();
            let observed = observed.clone();
            move || async move {
                match slot.take().await {
                    Some(v) => observed.store(v as usize, Ordering::SeqCst),
                    None => observed.store(0, Ordering::SeqCst),
                }
                Ok(())
            }
        });

        let report = Executor::new(2).run(graph).await;
        assert!(matches!(report.status("produce"), Some(OpStatus::Failed { .. })));
        assert!(report.succeeded("consume"));
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert!(report.first_error().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut graph = OperationGraph::new("panic");

        let bad = graph.add("bad", Priority::Utility, &[], || async {
            if true {
                panic!("operation exploded");
            }
            Ok(())
        });
        graph.add("after", Priority::Utility, &[bad], {
            let ran = ran.clone();
            move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let report = Executor::new(1).run(graph).await;
        assert_eq!(report.status("bad"), Some(&OpStatus::Panicked));
        assert!(report.succeeded("after"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lanes_bound_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut graph = OperationGraph::new("lanes");

        for i in 0..6 {
            let current = current.clone();
            let peak = peak.clone();
            graph.add(format!("op{}", i), Priority::Utility, &[], move || async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let report = Executor::new(2).run(graph).await;
        assert!(report.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_priority_orders_ready_operations() {
        let log: Log = Arc::default();
        let mut graph = OperationGraph::new("priority");

        graph.add("low", Priority::Background, &[], logging_op(&log, "low"));
        graph.add("mid", Priority::Utility, &[], logging_op(&log, "mid"));
        graph.add("high", Priority::UserInitiated, &[], logging_op(&log, "high"));

        Executor::new(1).run(graph).await;
        assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_keep_alive_spans_the_graph() {
        let executor = Executor::new(2);
        let mut graph = OperationGraph::new("keep-alive");
        graph.keep_alive("test sync");
        graph.add("wait", Priority::Utility, &[], || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });

        let handle = executor.spawn(graph);
        assert_eq!(executor.activity().active(), 1);

        let report = handle.await.unwrap();
        assert!(report.all_succeeded());
        assert!(executor.activity().is_idle());
    }

    #[test]
    fn test_forward_dependencies_are_ignored() {
        let mut graph = OperationGraph::new("invalid");
        let first = graph.add("first", Priority::Utility, &[], || async { Ok(()) });
        let second = graph.add("second", Priority::Utility, &[first, OpId(7)], || async { Ok(()) });

        assert_eq!(graph.dependencies(second), &[first]);
        assert_eq!(graph.operation_names().collect::<Vec<_>>(), vec!["first", "second"]);
    }
}
