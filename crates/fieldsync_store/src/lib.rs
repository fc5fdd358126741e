//! # FieldSync Store
//!
//! Durable local storage for the FieldSync client: the pending-mutation
//! queue and the snapshot cache, both backed by append-only record logs.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, sync, truncate)
//! - One record format for both logs: framed, checksummed CBOR
//! - Replay tolerates a torn tail (crash mid-append) by truncating it
//! - Enqueue is durable before the id is returned to the caller
//!
//! ## Layers
//!
//! - [`LogBackend`] with [`FileLog`] and [`MemoryLog`] implementations
//! - [`RecordLog`] framing records with a magic, kind, length, and CRC32
//! - [`MutationQueue`] ordered queue of [`QueuedMutation`]s
//! - [`SnapshotStore`] last-known-good server reads per named store
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_store::{MutationQueue, MutationRequest};
//!
//! let queue = MutationQueue::in_memory().unwrap();
//! let id = queue
//!     .enqueue(MutationRequest::new("POST", "https://api.example.com/planters"))
//!     .unwrap();
//! assert_eq!(queue.get(id).unwrap().id, id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cache;
mod error;
mod log;
mod mutation;
mod queue;
mod record;

pub use backend::{FileLog, LogBackend, MemoryLog};
pub use cache::{CacheEntry, SnapshotStore};
pub use error::{StoreError, StoreResult};
pub use log::{RecordLog, Replay};
pub use mutation::{MutationChange, MutationRequest, MutationStatus, QueuedMutation};
pub use queue::MutationQueue;
pub use record::{LogRecord, RecordKind, LOG_MAGIC, LOG_VERSION};
