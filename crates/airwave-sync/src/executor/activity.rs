//! Keep-alive activity tracking.
//!
//! Hosts that may be suspended by the operating system ask the tracker
//! whether work is outstanding, or wait until it drains. An activity is
//! open for as long as its [`ActivityGuard`] lives.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Counts in-flight activities.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    active: Arc<watch::Sender<usize>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        ActivityTracker {
            active: Arc::new(tx),
        }
    }

    /// Opens an activity. It closes when the guard is dropped.
    pub fn begin(&self, reason: impl Into<String>) -> ActivityGuard {
        let id = Uuid::new_v4();
        let reason = reason.into();
        self.active.send_modify(|n| *n += 1);
        info!(activity = %id, reason = %reason, "Activity started");

        ActivityGuard {
            id,
            reason,
            started: Instant::now(),
            active: self.active.clone(),
        }
    }

    /// Number of open activities.
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }

    /// Resolves once no activity is open.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// An open activity.
#[derive(Debug)]
pub struct ActivityGuard {
    id: Uuid,
    reason: String,
    started: Instant,
    active: Arc<watch::Sender<usize>>,
}

impl ActivityGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        debug!(
            activity = %self.id,
            reason = %self.reason,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Activity ended"
        );
    }
}
