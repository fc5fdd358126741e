//! Queued mutation value types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A captured write request, ready to be replayed verbatim.
///
/// Headers (including authorization) are stored exactly as they were at
/// capture time and resent unchanged when the mutation is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method (`POST`, `PUT`, `DELETE`, ...).
    pub method: String,
    /// Request headers at capture time.
    pub headers: BTreeMap<String, String>,
    /// Serialized request body.
    pub body: Vec<u8>,
}

impl MutationRequest {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Lifecycle state of a queued mutation.
///
/// There is deliberately no persisted `Synced` state: a confirmed success
/// removes the mutation from the queue in the same transaction, so a
/// mutation that exists at all is not yet known-delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    /// Waiting to be replayed.
    Pending,
    /// A replay attempt is currently on the wire.
    InFlight,
    /// Suspended: the server reported divergence; awaiting a resolution.
    Conflict,
    /// Permanently failed; requires explicit acknowledgment.
    DeadLetter,
}

impl MutationStatus {
    /// Returns true if the mutation is eligible for replay.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Conflict => "conflict",
            Self::DeadLetter => "dead-letter",
        };
        f.write_str(s)
    }
}

/// A write captured while offline, durably queued for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Queue-assigned id; monotonic, never reused. Insertion order and id
    /// order coincide.
    pub id: u64,
    /// The captured request.
    pub request: MutationRequest,
    /// Capture time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Number of replay attempts so far.
    pub attempts: u32,
    /// Current lifecycle state.
    pub status: MutationStatus,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
}

/// State transition applied to a queued mutation.
///
/// The queue persists the whole triple so replay-on-open needs no
/// read-modify-write of earlier records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationChange {
    /// New lifecycle state.
    pub status: MutationStatus,
    /// New attempt count.
    pub attempts: u32,
    /// New last-error message, replacing the previous one.
    pub last_error: Option<String>,
    /// Replacement request body, set when a conflict resolution rewrote
    /// the payload. `None` leaves the captured body untouched.
    pub body: Option<Vec<u8>>,
}

impl MutationChange {
    /// Creates a change to the given state and attempt count.
    pub fn to(status: MutationStatus, attempts: u32) -> Self {
        Self {
            status,
            attempts,
            last_error: None,
            body: None,
        }
    }

    /// Sets the last-error message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }

    /// Replaces the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl QueuedMutation {
    /// Applies a state change in place.
    pub fn apply(&mut self, change: &MutationChange) {
        self.status = change.status;
        self.attempts = change.attempts;
        self.last_error = change.last_error.clone();
        if let Some(body) = &change.body {
            self.request.body = body.clone();
        }
    }
}
