//! Durable cache of last-known-good server reads.
//!
//! Each named store holds at most one snapshot: the raw response bytes and
//! the time they were fetched. Replay is last-wins, so a refresh is a plain
//! append and compaction just rewrites the survivors.

use crate::backend::{FileLog, LogBackend, MemoryLog};
use crate::error::{StoreError, StoreResult};
use crate::log::RecordLog;
use crate::record::LogRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One cached server read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical store name, e.g. `"planters"`.
    pub store: String,
    /// Raw response body as fetched.
    pub payload: Vec<u8>,
    /// Wall-clock fetch time, milliseconds since the Unix epoch.
    pub fetched_at_ms: u64,
}

impl CacheEntry {
    /// Age of this entry relative to `now_ms`, saturating at zero for
    /// entries stamped in the future by a clock step.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.fetched_at_ms))
    }
}

struct CacheInner {
    log: RecordLog,
    entries: BTreeMap<String, CacheEntry>,
    dead_records: usize,
}

/// Dead records tolerated before `put` triggers an automatic compaction.
const COMPACT_MIN_DEAD: usize = 32;

/// Durable snapshot cache keyed by store name.
pub struct SnapshotStore {
    inner: Mutex<CacheInner>,
}

impl SnapshotStore {
    /// Opens a cache over the given backend, replaying existing snapshots.
    pub fn open(backend: Box<dyn LogBackend>) -> StoreResult<Self> {
        let log = RecordLog::new(backend, true);
        let replay = log.replay()?;

        let mut entries: BTreeMap<String, CacheEntry> = BTreeMap::new();
        let mut dead_records = 0usize;

        for record in replay.records {
            match record {
                LogRecord::Snapshot {
                    store,
                    payload,
                    fetched_at_ms,
                } => {
                    let entry = CacheEntry {
                        store: store.clone(),
                        payload,
                        fetched_at_ms,
                    };
                    if entries.insert(store, entry).is_some() {
                        dead_records += 1;
                    }
                }
                other => {
                    return Err(StoreError::UnexpectedRecord {
                        log: "cache",
                        kind: match other {
                            LogRecord::Enqueue(_) => "enqueue",
                            LogRecord::Update { .. } => "update",
                            LogRecord::Remove { .. } => "remove",
                            LogRecord::Snapshot { .. } => unreachable!(),
                        },
                    });
                }
            }
        }

        debug!(
            stores = entries.len(),
            truncated_tail = replay.truncated_tail,
            "opened snapshot cache"
        );

        Ok(Self {
            inner: Mutex::new(CacheInner {
                log,
                entries,
                dead_records,
            }),
        })
    }

    /// Opens a file-backed cache at `path`.
    pub fn open_file(path: &Path) -> StoreResult<Self> {
        Self::open(Box::new(FileLog::open(path)?))
    }

    /// Opens an ephemeral in-memory cache.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(Box::new(MemoryLog::new()))
    }

    /// Durably replaces the snapshot for `store`.
    pub fn put(&self, store: &str, payload: Vec<u8>) -> StoreResult<()> {
        self.put_at(store, payload, now_ms())
    }

    /// As [`put`](Self::put), with an explicit fetch timestamp.
    pub fn put_at(&self, store: &str, payload: Vec<u8>, fetched_at_ms: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.log.append(&LogRecord::Snapshot {
            store: store.to_owned(),
            payload: payload.clone(),
            fetched_at_ms,
        })?;
        let entry = CacheEntry {
            store: store.to_owned(),
            payload,
            fetched_at_ms,
        };
        if inner.entries.insert(store.to_owned(), entry).is_some() {
            inner.dead_records += 1;
        }
        debug!(store, "snapshot stored");

        if inner.dead_records >= COMPACT_MIN_DEAD {
            Self::compact_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Returns the cached snapshot for `store`, if any.
    pub fn get(&self, store: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(store).cloned()
    }

    /// True when no snapshot exists for `store` or the existing one is
    /// older than `max_age`. Stale entries are still served; staleness
    /// only signals that a refresh is due.
    pub fn is_stale(&self, store: &str, max_age: Duration) -> bool {
        match self.get(store) {
            Some(entry) => entry.age(now_ms()) > max_age,
            None => true,
        }
    }

    /// Names of all stores holding a snapshot.
    pub fn stores(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Rewrites the log keeping only the latest snapshot per store.
    pub fn compact(&self) -> StoreResult<()> {
        Self::compact_locked(&mut self.inner.lock())
    }

    fn compact_locked(inner: &mut CacheInner) -> StoreResult<()> {
        let records: Vec<LogRecord> = inner
            .entries
            .values()
            .cloned()
            .map(|e| LogRecord::Snapshot {
                store: e.store,
                payload: e.payload,
                fetched_at_ms: e.fetched_at_ms,
            })
            .collect();
        inner.log.rewrite(&records)?;
        inner.dead_records = 0;
        debug!(stores = inner.entries.len(), "compacted snapshot cache log");
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SnapshotStore")
            .field("stores", &inner.entries.len())
            .finish_non_exhaustive()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
