//! # FieldSync Engine
//!
//! Offline-first synchronization for field-data clients: writes made
//! without connectivity are captured into a durable queue and replayed
//! in order once the server is reachable again, while reads keep being
//! served from the last-known-good snapshot cache.
//!
//! ## Pieces
//!
//! - [`Interceptor`] captures writes and routes reads
//! - [`Orchestrator`] replays the queue, one pass at a time
//! - [`ConflictQueue`] holds mutations suspended on a 409 until the
//!   application picks a [`ConflictOutcome`]
//! - [`CacheManager`] keeps configured collections mirrored locally
//! - [`StatusPublisher`] fans sync state out to the UI
//! - [`SyncEngine`] wires it all together behind one driver task
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_engine::{
//!     ConnectivityState, EngineConfig, MockTransport, Submission, SyncEngine,
//! };
//! use fieldsync_store::{MutationQueue, MutationRequest, SnapshotStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = Arc::new(SyncEngine::new(
//!     Arc::new(MutationQueue::in_memory().unwrap()),
//!     Arc::new(SnapshotStore::in_memory().unwrap()),
//!     Arc::new(MockTransport::new()),
//!     EngineConfig::new(),
//! ));
//! engine.set_connectivity(ConnectivityState::Offline);
//!
//! let submission = engine
//!     .submit(MutationRequest::new("POST", "https://api.example.com/deliveries"))
//!     .await
//!     .unwrap();
//! assert!(matches!(submission, Submission::Queued(_)));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod conflict;
mod connectivity;
mod engine;
mod error;
mod interceptor;
mod orchestrator;
mod status;
mod transport;

pub use cache::{CacheManager, RefreshReport};
pub use config::{CachedStore, EngineConfig, RetryPolicy};
pub use conflict::{
    resolution_body, ConflictOutcome, ConflictQueue, ConflictRecord, OverwriteMode,
};
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use engine::{SyncEngine, SyncTrigger};
pub use error::{EngineError, EngineResult};
pub use interceptor::{Interceptor, ReadPolicy, ReadResult, ReadSource, Submission};
pub use orchestrator::{Orchestrator, PassReport};
pub use status::{StatusPublisher, SyncStatus};
pub use transport::{HttpResponse, MockTransport, Transport};
