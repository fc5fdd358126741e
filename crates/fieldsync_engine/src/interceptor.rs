//! Request interception.
//!
//! Writes and reads from the application flow through here instead of
//! going straight to the network. Online, a write goes to the server and
//! the live response comes back; offline (or when the send dies on the
//! wire) the write is captured into the durable queue and acknowledged
//! with its queue id. The caller always learns which of the two happened.

use crate::config::{CachedStore, EngineConfig};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::{EngineError, EngineResult};
use crate::transport::{HttpResponse, Transport};
use fieldsync_store::{MutationQueue, MutationRequest, SnapshotStore};
use std::sync::Arc;
use tracing::{debug, info};

/// How a submitted write was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The server answered; this is its live response, whatever the
    /// status. Interactive errors belong to the caller.
    Delivered(HttpResponse),
    /// The write was durably queued under this id for later replay.
    Queued(u64),
}

/// Preference for where a read is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Hit the server when online, falling back to the snapshot cache.
    #[default]
    NetworkFirst,
    /// Serve the snapshot if one exists; only fetch when the cache is
    /// empty. For views that prefer instant data over fresh data.
    CacheFirst,
}

/// Where a read's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Fresh from the server.
    Network,
    /// Served from the snapshot cache.
    Cache,
}

/// A completed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// Response or snapshot body.
    pub body: Vec<u8>,
    /// Origin of the bytes.
    pub source: ReadSource,
    /// Fetch time of the data, milliseconds since the Unix epoch. Zero
    /// for a network read (it is as fresh as now).
    pub fetched_at_ms: u64,
}

/// Captures writes and routes reads between network and cache.
pub struct Interceptor {
    queue: Arc<MutationQueue>,
    cache: Arc<SnapshotStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<ConnectivityMonitor>,
    config: EngineConfig,
}

impl Interceptor {
    /// Creates an interceptor over the given stores and transport.
    pub fn new(
        queue: Arc<MutationQueue>,
        cache: Arc<SnapshotStore>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<ConnectivityMonitor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            transport,
            connectivity,
            config,
        }
    }

    /// Submits a write.
    ///
    /// The returned id of a queued write is durable before this returns:
    /// once the caller sees `Queued`, a crash cannot lose the mutation.
    pub async fn submit(&self, request: MutationRequest) -> EngineResult<Submission> {
        if !self.connectivity.is_online() {
            let id = self.queue.enqueue(request)?;
            info!(id, "offline; write queued");
            return Ok(Submission::Queued(id));
        }

        match self.send(&request).await {
            Ok(response) => Ok(Submission::Delivered(response)),
            Err(err) if err.is_transient() => {
                // The network lied about connectivity. Capture the write
                // and flip the reported state so the queue starts filling
                // instead of every caller rediscovering the outage.
                let id = self.queue.enqueue(request)?;
                self.connectivity.set(ConnectivityState::Offline);
                info!(id, error = %err, "send failed; write queued");
                Ok(Submission::Queued(id))
            }
            Err(err) => Err(err),
        }
    }

    /// Reads a collection. `NetworkFirst` hits the server when online
    /// and falls back to the snapshot cache; `CacheFirst` serves the
    /// snapshot when one exists and only reaches the network without
    /// one. Offline, every read is cache-only. A successful network
    /// read refreshes the snapshot in passing.
    pub async fn fetch(&self, store: &CachedStore, policy: ReadPolicy) -> EngineResult<ReadResult> {
        if policy == ReadPolicy::CacheFirst {
            if let Ok(result) = self.from_cache(store) {
                return Ok(result);
            }
        }
        if self.connectivity.is_online() {
            match self.send_fetch(store).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() => {
                    self.connectivity.set(ConnectivityState::Offline);
                    debug!(store = %store.name, error = %err, "fetch failed; falling back to cache");
                }
                Err(err) => return Err(err),
            }
        }
        self.from_cache(store)
    }

    async fn send(&self, request: &MutationRequest) -> EngineResult<HttpResponse> {
        let send = self.transport.send(request);
        match tokio::time::timeout(self.config.request_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }

    async fn send_fetch(&self, store: &CachedStore) -> EngineResult<ReadResult> {
        let fetch = self.transport.fetch(&store.url);
        let response = match tokio::time::timeout(self.config.request_timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(EngineError::Timeout),
        };
        if !response.is_success() {
            return Err(EngineError::Rejected {
                status: response.status,
                body: response.body,
            });
        }
        self.cache.put(&store.name, response.body.clone())?;
        Ok(ReadResult {
            body: response.body,
            source: ReadSource::Network,
            fetched_at_ms: 0,
        })
    }

    fn from_cache(&self, store: &CachedStore) -> EngineResult<ReadResult> {
        match self.cache.get(&store.name) {
            Some(entry) => Ok(ReadResult {
                body: entry.payload,
                source: ReadSource::Cache,
                fetched_at_ms: entry.fetched_at_ms,
            }),
            None => Err(EngineError::transport(format!(
                "offline and no cached snapshot for {}",
                store.name
            ))),
        }
    }
}
