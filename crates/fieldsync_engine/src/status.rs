//! Sync status publication.
//!
//! One watch channel carries a cheap snapshot of "how is sync doing" for
//! badges and banners. Observers always see the latest value; identical
//! snapshots are suppressed so the UI only redraws on a real change.

use crate::connectivity::ConnectivityState;
use crate::orchestrator::PassReport;
use tokio::sync::watch;

/// Point-in-time summary of the engine for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Reported network reachability.
    pub connectivity: ConnectivityState,
    /// Mutations waiting on the server (pending, in-flight, conflict).
    pub pending_count: usize,
    /// Mutations suspended on a conflict, awaiting resolution.
    pub conflict_count: usize,
    /// Mutations permanently failed, awaiting acknowledgment.
    pub dead_letter_count: usize,
    /// True while a sync pass is running.
    pub syncing: bool,
    /// Report of the most recent finished pass.
    pub last_pass: Option<PassReport>,
}

/// Owner side of the status channel.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<SyncStatus>,
}

impl StatusPublisher {
    /// Creates a publisher with a default (idle, empty) status.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncStatus::default());
        Self { tx }
    }

    /// Publishes a new snapshot. No-change publishes do not wake
    /// observers.
    pub fn publish(&self, status: SyncStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Latest published snapshot.
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Subscribes an observer to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
