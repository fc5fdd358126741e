//! Inspect command implementation.

use fieldsync_store::{MutationQueue, SnapshotStore};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory path.
    pub path: String,
    /// Queue log size in bytes.
    pub queue_size: u64,
    /// Cache log size in bytes.
    pub cache_size: u64,
    /// Mutations waiting on the server.
    pub pending: usize,
    /// Mutations suspended on a conflict.
    pub conflicts: usize,
    /// Dead-lettered mutations.
    pub dead_letters: usize,
    /// Cached collections.
    pub cached_stores: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue_path = path.join("queue.log");
    let cache_path = path.join("cache.log");

    if !queue_path.exists() && !cache_path.exists() {
        return Err(format!("No FieldSync store found at {path:?}").into());
    }

    let mut result = InspectResult {
        path: path.display().to_string(),
        queue_size: 0,
        cache_size: 0,
        pending: 0,
        conflicts: 0,
        dead_letters: 0,
        cached_stores: Vec::new(),
    };

    if queue_path.exists() {
        result.queue_size = std::fs::metadata(&queue_path)?.len();
        let queue = MutationQueue::open_file(&queue_path)?;
        result.dead_letters = queue.dead_letter_count();
        for m in queue.list() {
            match m.status {
                fieldsync_store::MutationStatus::Conflict => result.conflicts += 1,
                fieldsync_store::MutationStatus::DeadLetter => {}
                _ => result.pending += 1,
            }
        }
    }

    if cache_path.exists() {
        result.cache_size = std::fs::metadata(&cache_path)?.len();
        let cache = SnapshotStore::open_file(&cache_path)?;
        result.cached_stores = cache.stores();
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Queue log: {} bytes", result.queue_size);
    println!("  Cache log: {} bytes", result.cache_size);
    println!();
    println!("Mutations:");
    println!("  Pending:      {}", result.pending);
    println!("  Conflicts:    {}", result.conflicts);
    println!("  Dead letters: {}", result.dead_letters);

    if !result.cached_stores.is_empty() {
        println!();
        println!("Cached collections:");
        for store in &result.cached_stores {
            println!("  {store}");
        }
    }
}
