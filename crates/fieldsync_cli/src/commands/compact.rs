//! Compact command implementation.

use fieldsync_store::{MutationQueue, SnapshotStore};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, queue: bool, cache: bool) -> Result<(), Box<dyn std::error::Error>> {
    if queue {
        let queue_path = path.join("queue.log");
        if queue_path.exists() {
            let before = std::fs::metadata(&queue_path)?.len();
            MutationQueue::open_file(&queue_path)?.compact()?;
            let after = std::fs::metadata(&queue_path)?.len();
            println!("queue.log: {before} -> {after} bytes");
        } else {
            println!("queue.log: not found, skipped");
        }
    }

    if cache {
        let cache_path = path.join("cache.log");
        if cache_path.exists() {
            let before = std::fs::metadata(&cache_path)?.len();
            SnapshotStore::open_file(&cache_path)?.compact()?;
            let after = std::fs::metadata(&cache_path)?.len();
            println!("cache.log: {before} -> {after} bytes");
        } else {
            println!("cache.log: not found, skipped");
        }
    }

    Ok(())
}
