//! Conflict records and resolutions.
//!
//! A 409 from the server suspends the offending mutation without touching
//! the rest of the queue. The engine keeps the server's snapshot from the
//! rejection body alongside the mutation id so the application can show
//! both versions and pick an outcome.
//!
//! Conflict *state* survives restart through the mutation's persisted
//! status; the server snapshot does not, so a conflict rediscovered on
//! open carries no snapshot until the server reports it again.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// How a resolved mutation's body is rebuilt before replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteMode {
    /// Replay the captured body unchanged, overwriting the server's copy.
    #[default]
    Blind,
    /// Shallow-merge the server snapshot with the captured body, local
    /// fields winning. Falls back to `Blind` when either side is not a
    /// JSON object.
    FieldMerge,
}

/// Application-chosen outcome for a suspended mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Re-enqueue the local write for replay.
    KeepLocal {
        /// Body-rebuild strategy.
        overwrite: OverwriteMode,
    },
    /// Discard the local write; the server's copy stands.
    KeepServer,
    /// Leave the mutation suspended for a later decision.
    Defer,
}

/// A suspended mutation awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Id of the suspended mutation.
    pub mutation_id: u64,
    /// Body the client tried to write.
    pub local_body: Vec<u8>,
    /// Server's version from the rejection body. `None` when the conflict
    /// was rediscovered on open and the server has not re-reported it.
    pub server_snapshot: Option<Vec<u8>>,
}

/// In-memory registry of suspended mutations, keyed by mutation id.
#[derive(Debug, Default)]
pub struct ConflictQueue {
    records: Mutex<BTreeMap<u64, ConflictRecord>>,
}

impl ConflictQueue {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a conflict, replacing any earlier record for the same
    /// mutation. A fresh 409 carries the newest server snapshot.
    pub fn record(&self, record: ConflictRecord) {
        self.records.lock().insert(record.mutation_id, record);
    }

    /// Returns the record for a mutation, if suspended.
    pub fn get(&self, mutation_id: u64) -> Option<ConflictRecord> {
        self.records.lock().get(&mutation_id).cloned()
    }

    /// Removes and returns the record for a mutation.
    pub fn take(&self, mutation_id: u64) -> Option<ConflictRecord> {
        self.records.lock().remove(&mutation_id)
    }

    /// All suspended records in mutation-id order.
    pub fn list(&self) -> Vec<ConflictRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Number of suspended mutations.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing is suspended.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Rebuilds the replay body for a `KeepLocal` resolution.
///
/// `FieldMerge` starts from the server object and overlays every local
/// field on top; unparseable or non-object sides degrade to the local
/// body unchanged.
pub fn resolution_body(record: &ConflictRecord, overwrite: OverwriteMode) -> Vec<u8> {
    match overwrite {
        OverwriteMode::Blind => record.local_body.clone(),
        OverwriteMode::FieldMerge => {
            let Some(snapshot) = &record.server_snapshot else {
                warn!(
                    mutation_id = record.mutation_id,
                    "no server snapshot for field merge; keeping local body"
                );
                return record.local_body.clone();
            };
            match merge_objects(&record.local_body, snapshot) {
                Some(merged) => merged,
                None => {
                    warn!(
                        mutation_id = record.mutation_id,
                        "bodies are not JSON objects; keeping local body"
                    );
                    record.local_body.clone()
                }
            }
        }
    }
}

fn merge_objects(local: &[u8], server: &[u8]) -> Option<Vec<u8>> {
    let Value::Object(local) = serde_json::from_slice(local).ok()? else {
        return None;
    };
    let Value::Object(mut merged) = serde_json::from_slice(server).ok()? else {
        return None;
    };
    for (key, value) in local {
        merged.insert(key, value);
    }
    serde_json::to_vec(&Value::Object(merged)).ok()
}
