//! Sync pass orchestration.
//!
//! A pass replays the queue front-to-back, one mutation at a time, and
//! classifies every response:
//!
//! - 2xx removes the mutation.
//! - 409 suspends it as a conflict and moves on.
//! - 401 puts it back pending and stops the batch; past the auth retry
//!   limit it is dead-lettered instead.
//! - any other 4xx dead-letters it and moves on.
//! - 5xx, transport failure, or timeout puts it back pending and stops
//!   the batch; the server is not healthy enough to keep hammering.
//!
//! At most one pass runs at a time: a trigger arriving mid-pass coalesces
//! into the pass already running instead of starting a second one.

use crate::config::EngineConfig;
use crate::conflict::{ConflictQueue, ConflictRecord};
use crate::error::{EngineError, EngineResult};
use crate::transport::{HttpResponse, Transport};
use fieldsync_store::{MutationChange, MutationQueue, MutationStatus, QueuedMutation};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one replayed mutation.
#[derive(Debug)]
enum ReplayOutcome {
    Success,
    Conflict(Vec<u8>),
    AuthExpired,
    Permanent(u16),
    Transient(String),
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Mutations sent to the server.
    pub attempted: usize,
    /// Mutations confirmed and removed.
    pub succeeded: usize,
    /// Mutations suspended on a conflict.
    pub conflicts: usize,
    /// Mutations dead-lettered.
    pub dead_lettered: usize,
    /// True when the pass stopped before draining the replayable queue.
    pub interrupted: bool,
}

impl PassReport {
    /// A clean pass drained everything replayable without interruption.
    pub fn is_clean(&self) -> bool {
        !self.interrupted
    }
}

/// Runs sync passes over the mutation queue.
pub struct Orchestrator {
    queue: Arc<MutationQueue>,
    conflicts: Arc<ConflictQueue>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    pass_lock: Mutex<()>,
    /// Consecutive 401s across passes; reset by any accepted request.
    auth_failures: AtomicU32,
}

impl Orchestrator {
    /// Creates an orchestrator over the given queue and transport.
    pub fn new(
        queue: Arc<MutationQueue>,
        conflicts: Arc<ConflictQueue>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            queue,
            conflicts,
            transport,
            config,
            pass_lock: Mutex::new(()),
            auth_failures: AtomicU32::new(0),
        }
    }

    /// Runs one sync pass, or returns `None` if a pass is already
    /// running. The concurrent trigger is considered served by the pass
    /// in progress.
    pub async fn run(&self) -> EngineResult<Option<PassReport>> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("sync pass already running; trigger coalesced");
            return Ok(None);
        };

        let batch = self.queue.replayable();
        if batch.is_empty() {
            return Ok(Some(PassReport::default()));
        }
        info!(batch = batch.len(), "sync pass started");

        let mut report = PassReport::default();
        for mutation in batch {
            report.attempted += 1;
            let attempts = mutation.attempts + 1;
            self.queue.update(
                mutation.id,
                MutationChange::to(MutationStatus::InFlight, attempts),
            )?;

            match self.replay_one(&mutation).await {
                ReplayOutcome::Success => {
                    self.auth_failures.store(0, Ordering::SeqCst);
                    self.queue.remove(mutation.id)?;
                    report.succeeded += 1;
                }
                ReplayOutcome::Conflict(snapshot) => {
                    self.auth_failures.store(0, Ordering::SeqCst);
                    self.queue.update(
                        mutation.id,
                        MutationChange::to(MutationStatus::Conflict, attempts)
                            .with_error("409 conflict"),
                    )?;
                    self.conflicts.record(ConflictRecord {
                        mutation_id: mutation.id,
                        local_body: mutation.request.body.clone(),
                        server_snapshot: Some(snapshot),
                    });
                    warn!(id = mutation.id, "mutation suspended on conflict");
                    report.conflicts += 1;
                }
                ReplayOutcome::AuthExpired => {
                    let failures = self.auth_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures > self.config.retry.auth_retry_limit {
                        self.dead_letter(&mut report, &mutation, attempts, "401 unauthorized")?;
                    } else {
                        self.queue.update(
                            mutation.id,
                            MutationChange::to(MutationStatus::Pending, attempts)
                                .with_error("401 unauthorized"),
                        )?;
                    }
                    warn!(id = mutation.id, failures, "credentials rejected; stopping pass");
                    report.interrupted = true;
                    break;
                }
                ReplayOutcome::Permanent(status) => {
                    self.auth_failures.store(0, Ordering::SeqCst);
                    self.dead_letter(&mut report, &mutation, attempts, &format!("{status}"))?;
                }
                ReplayOutcome::Transient(message) => {
                    if attempts >= self.config.retry.max_attempts {
                        self.dead_letter(&mut report, &mutation, attempts, &message)?;
                    } else {
                        self.queue.update(
                            mutation.id,
                            MutationChange::to(MutationStatus::Pending, attempts)
                                .with_error(&message),
                        )?;
                    }
                    warn!(id = mutation.id, %message, "transient failure; stopping pass");
                    report.interrupted = true;
                    break;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            conflicts = report.conflicts,
            dead_lettered = report.dead_lettered,
            interrupted = report.interrupted,
            "sync pass finished"
        );
        Ok(Some(report))
    }

    async fn replay_one(&self, mutation: &QueuedMutation) -> ReplayOutcome {
        let send = self.transport.send(&mutation.request);
        let result = match tokio::time::timeout(self.config.request_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        };
        classify(result)
    }

    fn dead_letter(
        &self,
        report: &mut PassReport,
        mutation: &QueuedMutation,
        attempts: u32,
        error: &str,
    ) -> EngineResult<()> {
        self.queue.update(
            mutation.id,
            MutationChange::to(MutationStatus::DeadLetter, attempts).with_error(error),
        )?;
        warn!(id = mutation.id, error, "mutation dead-lettered");
        report.dead_lettered += 1;
        Ok(())
    }
}

fn classify(result: EngineResult<HttpResponse>) -> ReplayOutcome {
    match result {
        Ok(response) if response.is_success() => ReplayOutcome::Success,
        Ok(response) if response.status == 409 => ReplayOutcome::Conflict(response.body),
        Ok(response) if response.status == 401 => ReplayOutcome::AuthExpired,
        Ok(response) if (400..500).contains(&response.status) => {
            ReplayOutcome::Permanent(response.status)
        }
        Ok(response) => ReplayOutcome::Transient(format!("server returned {}", response.status)),
        // Connection-level failures never confirm delivery; retry as-is.
        Err(err) => ReplayOutcome::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::transport::MockTransport;
    use fieldsync_store::MutationRequest;

    fn setup(config: EngineConfig) -> (Arc<MutationQueue>, Arc<MockTransport>, Orchestrator) {
        let queue = Arc::new(MutationQueue::in_memory().unwrap());
        let conflicts = Arc::new(ConflictQueue::new());
        let transport = Arc::new(MockTransport::new());
        let orchestrator = Orchestrator::new(
            Arc::clone(&queue),
            conflicts,
            Arc::clone(&transport) as Arc<dyn Transport>,
            config,
        );
        (queue, transport, orchestrator)
    }

    fn enqueue(queue: &MutationQueue, path: &str) -> u64 {
        queue
            .enqueue(
                MutationRequest::new("POST", format!("https://api.example.com{path}"))
                    .with_body(path.as_bytes().to_vec()),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn clean_pass_drains_queue_in_order() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        enqueue(&queue, "/a");
        enqueue(&queue, "/b");
        enqueue(&queue, "/c");
        transport.push_ok(3);

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded, 3);
        assert!(queue.is_empty());

        let urls: Vec<_> = transport
            .sent_requests()
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert!(urls[0].ends_with("/a"));
        assert!(urls[1].ends_with("/b"));
        assert!(urls[2].ends_with("/c"));
    }

    #[tokio::test]
    async fn transient_failure_stops_batch() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        let a = enqueue(&queue, "/a");
        let b = enqueue(&queue, "/b");
        transport.push_response(Err(EngineError::transport("connection reset")));

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.succeeded, 0);
        // Failed head reverts to pending; the rest was never attempted.
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::Pending);
        assert_eq!(queue.get(a).unwrap().attempts, 1);
        assert_eq!(queue.get(b).unwrap().attempts, 0);
        assert_eq!(transport.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn server_5xx_is_transient() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        let a = enqueue(&queue, "/a");
        transport.push_response(Ok(HttpResponse::new(503, Vec::new())));

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.interrupted);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::Pending);
    }

    #[tokio::test]
    async fn permanent_rejection_dead_letters_and_continues() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        let a = enqueue(&queue, "/a");
        let b = enqueue(&queue, "/b");
        transport.push_response(Ok(HttpResponse::new(422, b"bad payload".to_vec())));
        transport.push_ok(1);

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::DeadLetter);
        assert!(queue.get(b).is_none());
    }

    #[tokio::test]
    async fn conflict_suspends_without_blocking_rest() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        let a = enqueue(&queue, "/a");
        let b = enqueue(&queue, "/b");
        transport.push_response(Ok(HttpResponse::new(409, br#"{"v":2}"#.to_vec())));
        transport.push_ok(1);

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.conflicts, 1);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::Conflict);
        assert!(queue.get(b).is_none());
    }

    #[tokio::test]
    async fn conflict_snapshot_is_recorded() {
        let queue = Arc::new(MutationQueue::in_memory().unwrap());
        let conflicts = Arc::new(ConflictQueue::new());
        let transport = Arc::new(MockTransport::new());
        let orchestrator = Orchestrator::new(
            Arc::clone(&queue),
            Arc::clone(&conflicts),
            Arc::clone(&transport) as Arc<dyn Transport>,
            EngineConfig::new(),
        );

        let id = enqueue(&queue, "/a");
        transport.push_response(Ok(HttpResponse::new(409, br#"{"v":2}"#.to_vec())));
        orchestrator.run().await.unwrap().unwrap();

        let record = conflicts.get(id).unwrap();
        assert_eq!(record.server_snapshot.as_deref(), Some(br#"{"v":2}"#.as_ref()));
        assert_eq!(record.local_body, b"/a");
    }

    #[tokio::test]
    async fn auth_expiry_stops_batch_then_dead_letters_past_limit() {
        let config = EngineConfig::new()
            .with_retry(RetryPolicy::new(10).with_auth_retry_limit(2));
        let (queue, transport, orchestrator) = setup(config);
        let a = enqueue(&queue, "/a");
        enqueue(&queue, "/b");

        for _ in 0..2 {
            transport.push_response(Ok(HttpResponse::new(401, Vec::new())));
            let report = orchestrator.run().await.unwrap().unwrap();
            assert!(report.interrupted);
            assert_eq!(queue.get(a).unwrap().status, MutationStatus::Pending);
        }

        // Third consecutive 401 exceeds the limit.
        transport.push_response(Ok(HttpResponse::new(401, Vec::new())));
        let report = orchestrator.run().await.unwrap().unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::DeadLetter);
    }

    #[tokio::test]
    async fn attempt_ceiling_dead_letters_on_transient() {
        let config = EngineConfig::new().with_retry(RetryPolicy::new(2));
        let (queue, transport, orchestrator) = setup(config);
        let a = enqueue(&queue, "/a");

        transport.push_response(Err(EngineError::transport("reset")));
        orchestrator.run().await.unwrap().unwrap();
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::Pending);

        transport.push_response(Err(EngineError::transport("reset")));
        let report = orchestrator.run().await.unwrap().unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::DeadLetter);
    }

    #[tokio::test]
    async fn concurrent_trigger_coalesces() {
        let (queue, transport, orchestrator) = setup(EngineConfig::new());
        enqueue(&queue, "/a");
        transport.push_ok(1);

        let _guard = orchestrator.pass_lock.lock().await;
        assert!(orchestrator.run().await.unwrap().is_none());
        assert!(transport.sent_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out_as_transient() {
        struct StallingTransport;

        #[async_trait::async_trait]
        impl Transport for StallingTransport {
            async fn send(&self, _request: &MutationRequest) -> EngineResult<HttpResponse> {
                std::future::pending().await
            }
            async fn fetch(&self, _url: &str) -> EngineResult<HttpResponse> {
                std::future::pending().await
            }
        }

        let queue = Arc::new(MutationQueue::in_memory().unwrap());
        let a = enqueue(&queue, "/a");
        let orchestrator = Orchestrator::new(
            Arc::clone(&queue),
            Arc::new(ConflictQueue::new()),
            Arc::new(StallingTransport),
            EngineConfig::new().with_request_timeout(std::time::Duration::from_secs(5)),
        );

        let report = orchestrator.run().await.unwrap().unwrap();
        assert!(report.interrupted);
        assert_eq!(queue.get(a).unwrap().status, MutationStatus::Pending);
    }
}
