//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// The log contains a record that cannot be decoded.
    #[error("log corrupted: {0}")]
    Corrupted(String),

    /// Record payload failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// The referenced mutation does not exist in the queue.
    #[error("unknown mutation id {0}")]
    UnknownMutation(u64),

    /// A record of an unexpected kind was found in this log.
    #[error("unexpected record kind in {log}: {kind}")]
    UnexpectedRecord {
        /// Which log the record was read from.
        log: &'static str,
        /// Human-readable record kind.
        kind: &'static str,
    },
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}
