//! The sync engine facade.
//!
//! [`SyncEngine`] owns the queue, the snapshot cache, the conflict
//! registry, and a single driver task. The driver listens for sync
//! triggers, runs at most one pass at a time through the orchestrator,
//! schedules backoff retries after failed passes, and keeps the status
//! channel current.

use crate::cache::CacheManager;
use crate::config::{CachedStore, EngineConfig};
use crate::conflict::{
    resolution_body, ConflictOutcome, ConflictQueue, ConflictRecord,
};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::{EngineError, EngineResult};
use crate::interceptor::{Interceptor, ReadPolicy, ReadResult, Submission};
use crate::orchestrator::{Orchestrator, PassReport};
use crate::status::{StatusPublisher, SyncStatus};
use crate::transport::Transport;
use fieldsync_store::{
    MutationChange, MutationQueue, MutationRequest, MutationStatus, QueuedMutation, SnapshotStore,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Why a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity was reported restored.
    ConnectivityRestored,
    /// The periodic interval elapsed.
    Interval,
    /// The application asked for a pass now.
    Manual,
    /// The host's background-sync hook fired.
    BackgroundSync,
}

/// Offline-first synchronization engine.
pub struct SyncEngine {
    queue: Arc<MutationQueue>,
    cache: Arc<SnapshotStore>,
    conflicts: Arc<ConflictQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    interceptor: Interceptor,
    orchestrator: Arc<Orchestrator>,
    cache_manager: Arc<CacheManager>,
    status: StatusPublisher,
    config: EngineConfig,
    trigger_tx: mpsc::Sender<SyncTrigger>,
    trigger_rx: parking_lot::Mutex<Option<mpsc::Receiver<SyncTrigger>>>,
    shutdown_tx: watch::Sender<bool>,
    driver: parking_lot::Mutex<Option<JoinHandle<()>>>,
    last_pass: parking_lot::Mutex<Option<PassReport>>,
}

impl SyncEngine {
    /// Creates an engine over already-open stores.
    ///
    /// Mutations found suspended on a conflict are re-registered so the
    /// application can resolve them; their server snapshot is gone until
    /// the server re-reports the conflict.
    pub fn new(
        queue: Arc<MutationQueue>,
        cache: Arc<SnapshotStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        let conflicts = Arc::new(ConflictQueue::new());
        for mutation in queue.list() {
            if mutation.status == MutationStatus::Conflict {
                conflicts.record(ConflictRecord {
                    mutation_id: mutation.id,
                    local_body: mutation.request.body.clone(),
                    server_snapshot: None,
                });
            }
        }

        let connectivity = Arc::new(ConnectivityMonitor::new(ConnectivityState::Online));
        let interceptor = Interceptor::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&transport),
            Arc::clone(&connectivity),
            config.clone(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&queue),
            Arc::clone(&conflicts),
            Arc::clone(&transport),
            config.clone(),
        ));
        let cache_manager = Arc::new(CacheManager::new(
            Arc::clone(&cache),
            transport,
            config.clone(),
        ));

        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Self {
            queue,
            cache,
            conflicts,
            connectivity,
            interceptor,
            orchestrator,
            cache_manager,
            status: StatusPublisher::new(),
            config,
            trigger_tx,
            trigger_rx: parking_lot::Mutex::new(Some(trigger_rx)),
            shutdown_tx,
            driver: parking_lot::Mutex::new(None),
            last_pass: parking_lot::Mutex::new(None),
        };
        engine.publish(false);
        engine
    }

    /// Opens file-backed stores under `dir` and builds an engine on them.
    pub fn open(
        dir: &Path,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let queue = Arc::new(MutationQueue::open_file(&dir.join("queue.log"))?);
        let cache = Arc::new(SnapshotStore::open_file(&dir.join("cache.log"))?);
        Ok(Self::new(queue, cache, transport, config))
    }

    /// Spawns the driver task. Idempotent; a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }
        let Some(trigger_rx) = self.trigger_rx.lock().take() else {
            return;
        };
        let engine = Arc::clone(self);
        *driver = Some(tokio::spawn(engine.drive(trigger_rx)));
        info!("sync engine started");
    }

    /// Stops the driver task and waits for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "driver task failed");
            }
        }
        info!("sync engine stopped");
    }

    /// Submits a write through the interceptor.
    pub async fn submit(&self, request: MutationRequest) -> EngineResult<Submission> {
        let result = self.interceptor.submit(request).await;
        if matches!(result, Ok(Submission::Queued(_))) {
            self.publish(false);
        }
        result
    }

    /// Reads a collection through the interceptor.
    pub async fn fetch(&self, store: &CachedStore, policy: ReadPolicy) -> EngineResult<ReadResult> {
        self.interceptor.fetch(store, policy).await
    }

    /// Reports a connectivity transition observed by the host.
    pub fn set_connectivity(&self, state: ConnectivityState) {
        self.connectivity.set(state);
    }

    /// Requests a sync pass now. Coalesces into a running pass.
    pub async fn sync_now(&self) -> EngineResult<()> {
        self.trigger(SyncTrigger::Manual).await
    }

    /// Feeds a trigger to the driver.
    pub async fn trigger(&self, trigger: SyncTrigger) -> EngineResult<()> {
        self.trigger_tx
            .send(trigger)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Suspended conflicts awaiting resolution.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.list()
    }

    /// Dead-lettered mutations awaiting acknowledgment.
    pub fn dead_letters(&self) -> Vec<QueuedMutation> {
        self.queue.dead_letters()
    }

    /// Applies an application-chosen outcome to a suspended mutation.
    ///
    /// `KeepLocal` rebuilds the body per the overwrite mode and puts the
    /// mutation back in line at its original position; `KeepServer`
    /// discards it; `Defer` leaves it suspended.
    pub async fn resolve_conflict(
        &self,
        mutation_id: u64,
        outcome: ConflictOutcome,
    ) -> EngineResult<()> {
        let record = self
            .conflicts
            .get(mutation_id)
            .ok_or(EngineError::UnknownConflict(mutation_id))?;

        match outcome {
            ConflictOutcome::Defer => return Ok(()),
            ConflictOutcome::KeepServer => {
                self.queue.remove(mutation_id)?;
                self.conflicts.take(mutation_id);
                info!(id = mutation_id, "conflict resolved: server copy kept");
            }
            ConflictOutcome::KeepLocal { overwrite } => {
                let body = resolution_body(&record, overwrite);
                self.queue.update(
                    mutation_id,
                    MutationChange::to(MutationStatus::Pending, 0).with_body(body),
                )?;
                self.conflicts.take(mutation_id);
                info!(id = mutation_id, "conflict resolved: local write rescheduled");
                // Best effort; the periodic trigger covers a full channel.
                let _ = self.trigger_tx.try_send(SyncTrigger::Manual);
            }
        }
        self.publish(false);
        Ok(())
    }

    /// Acknowledges and drops a dead-lettered mutation.
    pub fn acknowledge_dead_letter(&self, mutation_id: u64) -> EngineResult<()> {
        match self.queue.get(mutation_id) {
            Some(m) if m.status == MutationStatus::DeadLetter => {
                self.queue.remove(mutation_id)?;
                self.publish(false);
                info!(id = mutation_id, "dead letter acknowledged");
                Ok(())
            }
            Some(_) => Err(EngineError::NotDeadLettered(mutation_id)),
            None => Err(EngineError::Durability(
                fieldsync_store::StoreError::UnknownMutation(mutation_id),
            )),
        }
    }

    /// The engine's mutation queue.
    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// The engine's snapshot cache.
    pub fn snapshot_cache(&self) -> &Arc<SnapshotStore> {
        &self.cache
    }

    fn publish(&self, syncing: bool) {
        self.status.publish(SyncStatus {
            connectivity: self.connectivity.state(),
            pending_count: self.queue.pending_count(),
            conflict_count: self.conflicts.len(),
            dead_letter_count: self.queue.dead_letter_count(),
            syncing,
            last_pass: self.last_pass.lock().clone(),
        });
    }

    async fn drive(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<SyncTrigger>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut conn_rx = self.connectivity.subscribe();
        let mut interval = self.config.sync_interval.map(tokio::time::interval);
        if let Some(interval) = interval.as_mut() {
            // The first tick fires immediately; the constructor already
            // published an initial status, skip straight to the cadence.
            interval.tick().await;
        }

        if self.connectivity.is_online() {
            self.cache_manager.refresh_stale().await;
        }

        let mut failed_passes = 0u32;
        let mut retry_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,

                changed = conn_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = conn_rx.borrow_and_update().is_online();
                    self.publish(false);
                    if online {
                        self.run_pass(&mut failed_passes, &mut retry_at).await;
                    }
                }

                trigger = trigger_rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    if self.connectivity.is_online() {
                        self.run_pass(&mut failed_passes, &mut retry_at).await;
                    } else {
                        warn!(?trigger, "sync trigger ignored while offline");
                    }
                }

                _ = tick(interval.as_mut()) => {
                    if self.connectivity.is_online() {
                        self.run_pass(&mut failed_passes, &mut retry_at).await;
                    }
                }

                _ = sleep_until(retry_at) => {
                    retry_at = None;
                    if self.connectivity.is_online() {
                        self.run_pass(&mut failed_passes, &mut retry_at).await;
                    }
                }
            }
        }
    }

    async fn run_pass(&self, failed_passes: &mut u32, retry_at: &mut Option<Instant>) {
        self.publish(true);
        match self.orchestrator.run().await {
            Ok(Some(report)) => {
                if report.is_clean() {
                    *failed_passes = 0;
                    *retry_at = None;
                    self.cache_manager.refresh_stale().await;
                } else {
                    *failed_passes += 1;
                    let delay = self.config.retry.delay_for(*failed_passes);
                    *retry_at = Some(Instant::now() + delay);
                    info!(failed_passes = *failed_passes, ?delay, "pass failed; retry scheduled");
                }
                *self.last_pass.lock() = Some(report);
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "sync pass aborted");
                *failed_passes += 1;
                *retry_at = Some(Instant::now() + self.config.retry.delay_for(*failed_passes));
            }
        }
        self.publish(false);
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queue", &self.queue)
            .field("connectivity", &self.connectivity.state())
            .finish_non_exhaustive()
    }
}

async fn tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::OverwriteMode;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn engine_with(transport: Arc<MockTransport>, config: EngineConfig) -> Arc<SyncEngine> {
        let queue = Arc::new(MutationQueue::in_memory().unwrap());
        let cache = Arc::new(SnapshotStore::in_memory().unwrap());
        Arc::new(SyncEngine::new(
            queue,
            cache,
            transport as Arc<dyn Transport>,
            config,
        ))
    }

    fn request(path: &str) -> MutationRequest {
        MutationRequest::new("POST", format!("https://api.example.com{path}"))
            .with_body(br#"{"weight_kg":120}"#.to_vec())
    }

    async fn drain(engine: &SyncEngine) {
        for _ in 0..100 {
            if !engine.status().syncing && engine.queue().pending_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain");
    }

    #[tokio::test(start_paused = true)]
    async fn offline_writes_replay_on_reconnect() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(
            Arc::clone(&transport),
            EngineConfig::new().with_sync_interval(None),
        );
        engine.start();
        engine.set_connectivity(ConnectivityState::Offline);

        assert!(matches!(
            engine.submit(request("/a")).await.unwrap(),
            Submission::Queued(1)
        ));
        assert!(matches!(
            engine.submit(request("/b")).await.unwrap(),
            Submission::Queued(2)
        ));
        assert_eq!(engine.status().pending_count, 2);

        transport.push_ok(2);
        engine.set_connectivity(ConnectivityState::Online);
        drain(&engine).await;

        assert!(engine.queue().is_empty());
        assert_eq!(transport.sent_requests().len(), 2);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_runs_a_pass() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(
            Arc::clone(&transport),
            EngineConfig::new().with_sync_interval(None),
        );
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();
        engine.set_connectivity(ConnectivityState::Online);
        engine.start();

        transport.push_ok(1);
        engine.sync_now().await.unwrap();
        drain(&engine).await;
        assert!(engine.queue().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn keep_server_discards_local_write() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(Arc::clone(&transport), EngineConfig::new());
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();

        // Suspend it the way a pass would.
        engine
            .queue()
            .update(1, MutationChange::to(MutationStatus::Conflict, 1))
            .unwrap();
        engine.conflicts.record(ConflictRecord {
            mutation_id: 1,
            local_body: br#"{"weight_kg":120}"#.to_vec(),
            server_snapshot: Some(br#"{"weight_kg":90}"#.to_vec()),
        });

        engine
            .resolve_conflict(1, ConflictOutcome::KeepServer)
            .await
            .unwrap();
        assert!(engine.queue().is_empty());
        assert!(engine.conflicts().is_empty());
    }

    #[tokio::test]
    async fn keep_local_merge_rewrites_body() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(Arc::clone(&transport), EngineConfig::new());
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();
        engine
            .queue()
            .update(1, MutationChange::to(MutationStatus::Conflict, 2))
            .unwrap();
        engine.conflicts.record(ConflictRecord {
            mutation_id: 1,
            local_body: br#"{"weight_kg":120}"#.to_vec(),
            server_snapshot: Some(br#"{"weight_kg":90,"verified":true}"#.to_vec()),
        });

        engine
            .resolve_conflict(
                1,
                ConflictOutcome::KeepLocal {
                    overwrite: OverwriteMode::FieldMerge,
                },
            )
            .await
            .unwrap();

        let m = engine.queue().get(1).unwrap();
        assert_eq!(m.status, MutationStatus::Pending);
        assert_eq!(m.attempts, 0);
        let body: serde_json::Value = serde_json::from_slice(&m.request.body).unwrap();
        assert_eq!(body["weight_kg"], 120);
        assert_eq!(body["verified"], true);
    }

    #[tokio::test]
    async fn defer_leaves_conflict_suspended() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(Arc::clone(&transport), EngineConfig::new());
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();
        engine
            .queue()
            .update(1, MutationChange::to(MutationStatus::Conflict, 1))
            .unwrap();
        engine.conflicts.record(ConflictRecord {
            mutation_id: 1,
            local_body: Vec::new(),
            server_snapshot: None,
        });

        engine.resolve_conflict(1, ConflictOutcome::Defer).await.unwrap();
        assert_eq!(engine.queue().get(1).unwrap().status, MutationStatus::Conflict);
        assert_eq!(engine.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn conflicts_reregistered_on_reopen() {
        let queue = Arc::new(MutationQueue::in_memory().unwrap());
        queue.enqueue(request("/a")).unwrap();
        queue
            .update(1, MutationChange::to(MutationStatus::Conflict, 3))
            .unwrap();

        let engine = SyncEngine::new(
            queue,
            Arc::new(SnapshotStore::in_memory().unwrap()),
            Arc::new(MockTransport::new()) as Arc<dyn Transport>,
            EngineConfig::new(),
        );
        let conflicts = engine.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].server_snapshot.is_none());
    }

    #[tokio::test]
    async fn dead_letter_acknowledgment() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(Arc::clone(&transport), EngineConfig::new());
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();

        assert!(matches!(
            engine.acknowledge_dead_letter(1),
            Err(EngineError::NotDeadLettered(1))
        ));

        engine
            .queue()
            .update(
                1,
                MutationChange::to(MutationStatus::DeadLetter, 5).with_error("410 gone"),
            )
            .unwrap();
        assert_eq!(engine.status().dead_letter_count, 0); // not yet republished
        engine.acknowledge_dead_letter(1).unwrap();
        assert!(engine.queue().is_empty());
        assert_eq!(engine.status().dead_letter_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reflects_queue_and_connectivity() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(
            Arc::clone(&transport),
            EngineConfig::new().with_sync_interval(None),
        );
        engine.start();
        let mut rx = engine.subscribe_status();

        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();

        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.pending_count, 1);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_is_retried_with_backoff() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine_with(
            Arc::clone(&transport),
            EngineConfig::new()
                .with_sync_interval(None)
                .with_retry(crate::config::RetryPolicy::new(5).with_base_delay(
                    Duration::from_millis(50),
                )),
        );
        engine.start();
        engine.set_connectivity(ConnectivityState::Offline);
        engine.submit(request("/a")).await.unwrap();

        // First pass fails; the retry succeeds without any new trigger.
        transport.push_response(Err(EngineError::transport("reset")));
        transport.push_ok(1);
        engine.set_connectivity(ConnectivityState::Online);
        drain(&engine).await;

        assert!(engine.queue().is_empty());
        assert_eq!(transport.sent_requests().len(), 2);
        engine.shutdown().await;
    }
}
