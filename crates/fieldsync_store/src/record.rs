//! Log record types and the on-disk envelope.
//!
//! Every record is framed as:
//!
//! ```text
//! magic (4) | version (2, LE) | kind (1) | payload len (4, LE) | payload | crc32 (4, LE)
//! ```
//!
//! The payload is CBOR (the record is self-describing; the kind byte lets
//! tooling scan a log without decoding payloads). The CRC covers everything
//! before it. A record that fails framing or CRC validation marks the end
//! of the readable log: anything at or after it is an interrupted write.

use crate::error::{StoreError, StoreResult};
use crate::mutation::{MutationChange, QueuedMutation};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a fieldsync log record.
pub const LOG_MAGIC: [u8; 4] = *b"FSLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Envelope header size: magic (4) + version (2) + kind (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

/// CRC trailer size.
pub(crate) const CRC_SIZE: usize = 4;

/// Kind byte for each record variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A new mutation entered the queue.
    Enqueue = 1,
    /// An existing mutation changed state.
    Update = 2,
    /// A mutation left the queue.
    Remove = 3,
    /// A reference-data snapshot was replaced.
    Snapshot = 4,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Enqueue),
            2 => Some(Self::Update),
            3 => Some(Self::Remove),
            4 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the kind to its byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enqueue => "enqueue",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Snapshot => "snapshot",
        };
        f.write_str(s)
    }
}

/// A single durable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A mutation entered the queue.
    Enqueue(QueuedMutation),
    /// A mutation changed state.
    Update {
        /// Mutation id.
        id: u64,
        /// The new state triple.
        change: MutationChange,
    },
    /// A mutation left the queue (confirmed success, keep-server
    /// resolution, or dead-letter acknowledgment).
    Remove {
        /// Mutation id.
        id: u64,
    },
    /// A whole-store reference snapshot.
    Snapshot {
        /// Logical store name.
        store: String,
        /// Collection payload, replaced wholesale.
        payload: Vec<u8>,
        /// Fetch time, milliseconds since the Unix epoch.
        fetched_at_ms: u64,
    },
}

impl LogRecord {
    /// Returns the kind of this record.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Enqueue(_) => RecordKind::Enqueue,
            Self::Update { .. } => RecordKind::Update,
            Self::Remove { .. } => RecordKind::Remove,
            Self::Snapshot { .. } => RecordKind::Snapshot,
        }
    }

    /// Encodes the record with its full envelope.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| StoreError::codec(e.to_string()))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::codec("record payload exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.kind().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Outcome of decoding one record from a byte slice.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A valid record, and how many bytes it occupied.
    Record {
        /// The decoded record.
        record: LogRecord,
        /// Total envelope size in bytes.
        consumed: usize,
    },
    /// The bytes at this position are not a complete valid record; the
    /// log ends here.
    Torn,
}

/// Decodes the record starting at the beginning of `data`.
pub(crate) fn decode_record(data: &[u8]) -> Decoded {
    if data.len() < HEADER_SIZE {
        return Decoded::Torn;
    }
    if data[0..4] != LOG_MAGIC {
        return Decoded::Torn;
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != LOG_VERSION {
        return Decoded::Torn;
    }
    let Some(kind) = RecordKind::from_byte(data[6]) else {
        return Decoded::Torn;
    };
    let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;

    let total = HEADER_SIZE + len + CRC_SIZE;
    if data.len() < total {
        return Decoded::Torn;
    }

    let crc_offset = HEADER_SIZE + len;
    let stored_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    if crc32(&data[..crc_offset]) != stored_crc {
        return Decoded::Torn;
    }

    let payload = &data[HEADER_SIZE..crc_offset];
    let record: LogRecord = match ciborium::from_reader(payload) {
        Ok(r) => r,
        Err(_) => return Decoded::Torn,
    };
    if record.kind() != kind {
        return Decoded::Torn;
    }

    Decoded::Record {
        record,
        consumed: total,
    }
}

/// CRC32 (IEEE polynomial), table-driven.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
