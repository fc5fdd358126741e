//! Cache refresh over the transport.
//!
//! After a clean sync pass (and periodically while online) the engine
//! refetches each configured collection and replaces its snapshot. A
//! failed fetch never evicts: the previous snapshot keeps serving reads
//! until a refresh succeeds.

use crate::config::{CachedStore, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::transport::Transport;
use fieldsync_store::SnapshotStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a refresh sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Stores whose snapshot was replaced.
    pub refreshed: usize,
    /// Stores whose fetch failed; their old snapshot stands.
    pub failed: usize,
}

/// Keeps configured collections mirrored into the snapshot cache.
pub struct CacheManager {
    cache: Arc<SnapshotStore>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl CacheManager {
    /// Creates a manager over the given cache and transport.
    pub fn new(
        cache: Arc<SnapshotStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            transport,
            config,
        }
    }

    /// Refreshes every configured store. Failures are counted, logged,
    /// and otherwise swallowed; one unreachable collection must not stop
    /// the others from refreshing.
    pub async fn refresh_all(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        for store in &self.config.cached_stores {
            match self.refresh(store).await {
                Ok(()) => report.refreshed += 1,
                Err(err) => {
                    warn!(store = %store.name, error = %err, "cache refresh failed; keeping previous snapshot");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Refreshes every configured store whose snapshot is missing or
    /// older than the configured staleness window.
    pub async fn refresh_stale(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        for store in &self.config.cached_stores {
            if !self.cache.is_stale(&store.name, self.config.cache_max_age) {
                continue;
            }
            match self.refresh(store).await {
                Ok(()) => report.refreshed += 1,
                Err(err) => {
                    warn!(store = %store.name, error = %err, "cache refresh failed; keeping previous snapshot");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Fetches one store and replaces its snapshot on success.
    pub async fn refresh(&self, store: &CachedStore) -> EngineResult<()> {
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
        self.cache.put(&store.name, response.body)?;
        debug!(store = %store.name, "snapshot refreshed");
        Ok(())
    }
}
