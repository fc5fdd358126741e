//! Append-only record log over a [`LogBackend`].
//!
//! The log is the durability primitive shared by the mutation queue and the
//! snapshot store. Appends are framed by [`crate::record`] and fsynced
//! before returning (unless the log was opened without `sync_on_write`,
//! which only tests do). Replay validates records front to back and
//! truncates an interrupted tail write.

use crate::backend::LogBackend;
use crate::error::StoreResult;
use crate::record::{decode_record, Decoded, LogRecord};
use parking_lot::Mutex;
use tracing::warn;

/// Result of replaying a log from the start.
#[derive(Debug)]
pub struct Replay {
    /// All valid records, in append order.
    pub records: Vec<LogRecord>,
    /// Whether an interrupted tail write was discarded.
    pub truncated_tail: bool,
}

/// An append-only, CRC-validated record log.
///
/// All access serializes through one internal lock, so interleaved
/// producers cannot corrupt framing or observe partial appends.
pub struct RecordLog {
    backend: Mutex<Box<dyn LogBackend>>,
    sync_on_write: bool,
}

impl RecordLog {
    /// Creates a log over the given backend.
    pub fn new(backend: Box<dyn LogBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends one record, returning the offset it was written at.
    ///
    /// When `sync_on_write` is set, the record is durable before this
    /// returns.
    pub fn append(&self, record: &LogRecord) -> StoreResult<u64> {
        let data = record.encode()?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Replays every valid record from the start of the log.
    ///
    /// If the log ends in an interrupted write (bad framing or CRC), the
    /// tail is truncated so the next append starts on a record boundary.
    /// Queue and snapshot logs are bounded by live data, so reading the
    /// whole file at once is fine here.
    pub fn replay(&self) -> StoreResult<Replay> {
        let mut backend = self.backend.lock();
        let size = backend.size()?;
        let data = backend.read_at(0, size as usize)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            match decode_record(&data[pos..]) {
                Decoded::Record { record, consumed } => {
                    records.push(record);
                    pos += consumed;
                }
                Decoded::Torn => break,
            }
        }

        let truncated_tail = pos < data.len();
        if truncated_tail {
            warn!(
                valid_bytes = pos,
                discarded_bytes = data.len() - pos,
                "discarding interrupted tail write from record log"
            );
            backend.truncate(pos as u64)?;
        }

        Ok(Replay {
            records,
            truncated_tail,
        })
    }

    /// Replaces the entire log contents with the given records.
    ///
    /// Used by compaction. The rewrite is synced before returning.
    pub fn rewrite(&self, records: &[LogRecord]) -> StoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        for record in records {
            let data = record.encode()?;
            backend.append(&data)?;
        }
        backend.sync()?;
        Ok(())
    }

    /// Returns the log size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        self.backend.lock().size()
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
