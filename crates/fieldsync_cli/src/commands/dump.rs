//! Dump command implementation.

use fieldsync_store::{MutationQueue, QueuedMutation};
use serde::Serialize;
use std::path::Path;

/// One queued mutation, flattened for display.
#[derive(Debug, Serialize)]
struct DumpedMutation {
    id: u64,
    method: String,
    url: String,
    status: String,
    attempts: u32,
    created_at_ms: u64,
    body_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl From<&QueuedMutation> for DumpedMutation {
    fn from(m: &QueuedMutation) -> Self {
        Self {
            id: m.id,
            method: m.request.method.clone(),
            url: m.request.url.clone(),
            status: m.status.to_string(),
            attempts: m.attempts,
            created_at_ms: m.created_at_ms,
            body_bytes: m.request.body.len(),
            last_error: m.last_error.clone(),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    dead_letters_only: bool,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue_path = path.join("queue.log");
    if !queue_path.exists() {
        return Err(format!("No queue log found at {queue_path:?}").into());
    }

    let queue = MutationQueue::open_file(&queue_path)?;
    let mutations = if dead_letters_only {
        queue.dead_letters()
    } else {
        queue.list()
    };
    let shown = limit.unwrap_or(mutations.len()).min(mutations.len());
    let dumped: Vec<DumpedMutation> = mutations[..shown].iter().map(Into::into).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&dumped)?),
        _ => {
            println!(
                "{} of {} mutation(s) in {}",
                shown,
                mutations.len(),
                queue_path.display()
            );
            for m in &dumped {
                println!(
                    "  #{} {} {} [{}] attempts={} body={}B",
                    m.id, m.method, m.url, m.status, m.attempts, m.body_bytes
                );
                if let Some(err) = &m.last_error {
                    println!("      last error: {err}");
                }
            }
        }
    }

    Ok(())
}
