//! Durable, ordered queue of pending mutations.
//!
//! The queue owns every [`QueuedMutation`]: callers enqueue requests and
//! apply state changes, and a mutation leaves the queue only through
//! [`MutationQueue::remove`] (confirmed success, keep-server resolution, or
//! dead-letter acknowledgment). Insertion order is the only ordering
//! guarantee, and ids are assigned monotonically under the queue lock so
//! id order and insertion order coincide.
//!
//! Durability contract: `enqueue` returns only after the record is synced
//! to the backend, so a caller holding the returned id may safely treat
//! the write as accepted.

use crate::backend::{FileLog, LogBackend, MemoryLog};
use crate::error::{StoreError, StoreResult};
use crate::log::RecordLog;
use crate::mutation::{MutationChange, MutationRequest, MutationStatus, QueuedMutation};
use crate::record::LogRecord;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Dead records tolerated before `remove` triggers an automatic compaction.
const COMPACT_MIN_DEAD: usize = 64;

struct QueueInner {
    log: RecordLog,
    /// Live mutations keyed by id; iteration order is insertion order.
    entries: BTreeMap<u64, QueuedMutation>,
    /// Next id to assign. Monotonic across restarts.
    next_id: u64,
    /// Log records that no longer contribute to live state.
    dead_records: usize,
}

/// Durable mutation queue with single-writer semantics.
///
/// Every operation takes the internal lock for its full duration, so
/// concurrent producers cannot interleave id assignment with the append,
/// duplicate ids, or observe a half-applied transaction.
pub struct MutationQueue {
    inner: Mutex<QueueInner>,
}

impl MutationQueue {
    /// Opens a queue over the given backend, replaying existing records.
    ///
    /// Mutations found `InFlight` are downgraded to `Pending`: a crash
    /// mid-pass must not strand a mutation in a state nothing can reach.
    pub fn open(backend: Box<dyn LogBackend>) -> StoreResult<Self> {
        let log = RecordLog::new(backend, true);
        let replay = log.replay()?;

        let mut entries: BTreeMap<u64, QueuedMutation> = BTreeMap::new();
        let mut max_id = 0u64;
        let mut dead_records = 0usize;

        for record in replay.records {
            match record {
                LogRecord::Enqueue(mut mutation) => {
                    max_id = max_id.max(mutation.id);
                    if mutation.status == MutationStatus::InFlight {
                        mutation.status = MutationStatus::Pending;
                    }
                    entries.insert(mutation.id, mutation);
                }
                LogRecord::Update { id, change } => {
                    max_id = max_id.max(id);
                    dead_records += 1;
                    match entries.get_mut(&id) {
                        Some(mutation) => {
                            mutation.apply(&change);
                            if mutation.status == MutationStatus::InFlight {
                                mutation.status = MutationStatus::Pending;
                            }
                        }
                        None => {
                            warn!(id, "update record for unknown mutation; skipping");
                        }
                    }
                }
                LogRecord::Remove { id } => {
                    max_id = max_id.max(id);
                    dead_records += 1;
                    if entries.remove(&id).is_some() {
                        // The enqueue record is now dead as well.
                        dead_records += 1;
                    }
                }
                LogRecord::Snapshot { .. } => {
                    return Err(StoreError::UnexpectedRecord {
                        log: "queue",
                        kind: "snapshot",
                    });
                }
            }
        }

        debug!(
            live = entries.len(),
            dead_records,
            truncated_tail = replay.truncated_tail,
            "opened mutation queue"
        );

        Ok(Self {
            inner: Mutex::new(QueueInner {
                log,
                entries,
                next_id: max_id + 1,
                dead_records,
            }),
        })
    }

    /// Opens a file-backed queue at `path`.
    pub fn open_file(path: &Path) -> StoreResult<Self> {
        Self::open(Box::new(FileLog::open(path)?))
    }

    /// Opens an ephemeral in-memory queue.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(Box::new(MemoryLog::new()))
    }

    /// Durably appends a new pending mutation, returning its id.
    ///
    /// The id is assigned and the record synced under one lock hold; the
    /// enqueue is atomic and never partial.
    pub fn enqueue(&self, request: MutationRequest) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        let mutation = QueuedMutation {
            id,
            request,
            created_at_ms: now_ms(),
            attempts: 0,
            status: MutationStatus::Pending,
            last_error: None,
        };
        inner.log.append(&LogRecord::Enqueue(mutation.clone()))?;
        inner.next_id += 1;
        inner.entries.insert(id, mutation);
        debug!(id, "mutation enqueued");
        Ok(id)
    }

    /// Returns all live mutations in insertion order.
    pub fn list(&self) -> Vec<QueuedMutation> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Returns mutations eligible for replay, in insertion order.
    pub fn replayable(&self) -> Vec<QueuedMutation> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|m| m.status.is_replayable())
            .cloned()
            .collect()
    }

    /// Returns dead-lettered mutations in insertion order.
    pub fn dead_letters(&self) -> Vec<QueuedMutation> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|m| m.status == MutationStatus::DeadLetter)
            .cloned()
            .collect()
    }

    /// Looks up one mutation by id.
    pub fn get(&self, id: u64) -> Option<QueuedMutation> {
        self.inner.lock().entries.get(&id).cloned()
    }

    /// Durably applies a state change to a mutation.
    pub fn update(&self, id: u64, change: MutationChange) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&id) {
            return Err(StoreError::UnknownMutation(id));
        }
        inner.log.append(&LogRecord::Update {
            id,
            change: change.clone(),
        })?;
        inner.dead_records += 1;
        if let Some(mutation) = inner.entries.get_mut(&id) {
            mutation.apply(&change);
        }
        Ok(())
    }

    /// Durably removes a mutation from the queue.
    pub fn remove(&self, id: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&id) {
            return Err(StoreError::UnknownMutation(id));
        }
        inner.log.append(&LogRecord::Remove { id })?;
        inner.entries.remove(&id);
        inner.dead_records += 2;
        debug!(id, "mutation removed");

        if inner.dead_records >= COMPACT_MIN_DEAD && inner.dead_records >= inner.entries.len() {
            Self::compact_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Total live mutations, dead letters included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the queue holds no mutations at all.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Mutations still waiting on the server: pending, in-flight, or
    /// suspended on a conflict. Dead letters are excluded; they are
    /// surfaced separately and only leave through acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|m| m.status != MutationStatus::DeadLetter)
            .count()
    }

    /// Number of dead-lettered mutations awaiting acknowledgment.
    pub fn dead_letter_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|m| m.status == MutationStatus::DeadLetter)
            .count()
    }

    /// Rewrites the log with only live state.
    pub fn compact(&self) -> StoreResult<()> {
        Self::compact_locked(&mut self.inner.lock())
    }

    fn compact_locked(inner: &mut QueueInner) -> StoreResult<()> {
        let mut records: Vec<LogRecord> = inner
            .entries
            .values()
            .cloned()
            .map(LogRecord::Enqueue)
            .collect();
        if records.is_empty() && inner.next_id > 1 {
            // Id watermark: an empty compacted log must still remember the
            // highest id ever assigned, or a restart would reuse ids.
            records.push(LogRecord::Remove {
                id: inner.next_id - 1,
            });
        }
        inner.log.rewrite(&records)?;
        inner.dead_records = if inner.entries.is_empty() && inner.next_id > 1 {
            1
        } else {
            0
        };
        debug!(live = inner.entries.len(), "compacted mutation queue log");
        Ok(())
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MutationQueue")
            .field("len", &inner.entries.len())
            .field("next_id", &inner.next_id)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn post(path: &str) -> MutationRequest {
        MutationRequest::new("POST", format!("https://api.example.com{path}"))
            .with_body(path.as_bytes().to_vec())
    }

    #[test]
    fn enqueue_assigns_monotonic_ids() {
        let queue = MutationQueue::in_memory().unwrap();
        assert_eq!(queue.enqueue(post("/a")).unwrap(), 1);
        assert_eq!(queue.enqueue(post("/b")).unwrap(), 2);
        assert_eq!(queue.enqueue(post("/c")).unwrap(), 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let queue = MutationQueue::in_memory().unwrap();
        for i in 0..5 {
            queue.enqueue(post(&format!("/{i}"))).unwrap();
        }
        let urls: Vec<_> = queue.list().iter().map(|m| m.request.url.clone()).collect();
        assert!(urls.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn remove_only_named_mutation() {
        let queue = MutationQueue::in_memory().unwrap();
        let a = queue.enqueue(post("/a")).unwrap();
        let b = queue.enqueue(post("/b")).unwrap();

        queue.remove(a).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.get(a).is_none());
        assert!(queue.get(b).is_some());

        assert!(matches!(
            queue.remove(a),
            Err(StoreError::UnknownMutation(_))
        ));
    }

    #[test]
    fn update_changes_state() {
        let queue = MutationQueue::in_memory().unwrap();
        let id = queue.enqueue(post("/a")).unwrap();
        queue
            .update(
                id,
                MutationChange::to(MutationStatus::DeadLetter, 4).with_error("403 forbidden"),
            )
            .unwrap();

        let m = queue.get(id).unwrap();
        assert_eq!(m.status, MutationStatus::DeadLetter);
        assert_eq!(m.attempts, 4);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.dead_letter_count(), 1);
    }

    #[test]
    fn enqueue_after_interrupted_write_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        let queue = MutationQueue::open_file(&path).unwrap();
        queue.enqueue(post("/a")).unwrap();

        // Leftovers of an interrupted append: bytes on disk past the
        // boundary the log last confirmed.
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x00]).unwrap();
        }

        let id = queue.enqueue(post("/b")).unwrap();
        drop(queue);

        // The acknowledged mutation must still be there.
        let queue = MutationQueue::open_file(&path).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(id).unwrap().request.url, "https://api.example.com/b");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let queue = MutationQueue::open_file(&path).unwrap();
            queue.enqueue(post("/a")).unwrap();
            let b = queue.enqueue(post("/b")).unwrap();
            queue.remove(b).unwrap();
        }

        let queue = MutationQueue::open_file(&path).unwrap();
        let entries = queue.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request.url, "https://api.example.com/a");
        // Removed id must not be reused.
        assert_eq!(queue.enqueue(post("/c")).unwrap(), 3);
    }

    #[test]
    fn in_flight_downgraded_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let queue = MutationQueue::open_file(&path).unwrap();
            let id = queue.enqueue(post("/a")).unwrap();
            queue
                .update(id, MutationChange::to(MutationStatus::InFlight, 1))
                .unwrap();
        }

        let queue = MutationQueue::open_file(&path).unwrap();
        let m = queue.list().pop().unwrap();
        assert_eq!(m.status, MutationStatus::Pending);
        assert_eq!(m.attempts, 1);
    }

    #[test]
    fn compaction_keeps_state_and_watermark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let queue = MutationQueue::open_file(&path).unwrap();
            for i in 0..10 {
                queue.enqueue(post(&format!("/{i}"))).unwrap();
            }
            for id in 1..=10 {
                queue.remove(id).unwrap();
            }
            queue.compact().unwrap();
            assert!(queue.is_empty());
        }

        // Ids keep climbing after an empty-queue compaction + restart.
        let queue = MutationQueue::open_file(&path).unwrap();
        assert_eq!(queue.enqueue(post("/fresh")).unwrap(), 11);
    }

    #[test]
    fn compaction_shrinks_log() {
        let queue = MutationQueue::in_memory().unwrap();
        for i in 0..20 {
            let id = queue.enqueue(post(&format!("/{i}"))).unwrap();
            if i % 2 == 0 {
                queue.remove(id).unwrap();
            }
        }
        let keep: Vec<_> = queue.list();
        queue.compact().unwrap();
        assert_eq!(queue.list(), keep);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Enqueue,
            RemoveNth(usize),
            DeadLetterNth(usize),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => Just(Op::Enqueue),
                1 => (0usize..8).prop_map(Op::RemoveNth),
                1 => (0usize..8).prop_map(Op::DeadLetterNth),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Ids stay strictly increasing in insertion order no matter
            /// how enqueues, removals, and dead-letterings interleave.
            #[test]
            fn order_is_insertion_order(ops in proptest::collection::vec(op_strategy(), 1..40)) {
                let queue = MutationQueue::in_memory().unwrap();
                for op in ops {
                    match op {
                        Op::Enqueue => {
                            queue.enqueue(post("/x")).unwrap();
                        }
                        Op::RemoveNth(n) => {
                            let live = queue.list();
                            if let Some(m) = live.get(n % live.len().max(1)) {
                                queue.remove(m.id).unwrap();
                            }
                        }
                        Op::DeadLetterNth(n) => {
                            let live = queue.list();
                            if let Some(m) = live.get(n % live.len().max(1)) {
                                queue.update(
                                    m.id,
                                    MutationChange::to(MutationStatus::DeadLetter, m.attempts)
                                        .with_error("rejected"),
                                ).unwrap();
                            }
                        }
                    }

                    let ids: Vec<_> = queue.list().iter().map(|m| m.id).collect();
                    prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
                    prop_assert_eq!(
                        queue.pending_count() + queue.dead_letter_count(),
                        queue.len()
                    );
                }
            }
        }
    }
}
