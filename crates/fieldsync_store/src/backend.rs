//! Byte-store backends for the record log.
//!
//! A [`LogBackend`] is an opaque append-only byte store. The record format
//! lives entirely in [`crate::record`]; backends never interpret the data
//! they hold. Two implementations are provided: [`FileLog`] for durable
//! on-disk storage and [`MemoryLog`] for tests and ephemeral engines.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Low-level byte store underneath a record log.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, all appended data survives process termination
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends bytes, returning the offset they were written at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Returns the current size in bytes.
    fn size(&self) -> StoreResult<u64>;

    /// Forces appended data and metadata to durable storage.
    fn sync(&mut self) -> StoreResult<()>;

    /// Discards everything at and after `new_size`.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;
}

/// Durable file-backed log storage.
///
/// `sync` maps to `File::sync_all`, so a completed append+sync is
/// guaranteed on disk before control returns to the caller.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileLog {
    /// Opens or creates a log file at `path`, creating parent directories
    /// as needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for FileLog {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StoreError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        // Seek to the tracked boundary, not the physical end. After an
        // interrupted write the file can be longer than the tracked size,
        // and a record appended past that garbage would sit at offsets
        // the log no longer agrees on.
        file.seek(SeekFrom::Start(offset))?;
        if let Err(err) = file.write_all(data) {
            // A partial record must not survive the failed append. Roll
            // the file back to the last good boundary so the next append
            // starts clean.
            let _ = file.set_len(offset);
            return Err(err.into());
        }
        *size += data.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();
        if new_size > *size {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {}", *size, new_size),
            )));
        }
        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }
}

/// In-memory log storage for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemoryLog {
    data: RwLock<Vec<u8>>,
}

impl MemoryLog {
    /// Creates an empty in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory log seeded with raw bytes.
    ///
    /// Useful for recovery tests that need a hand-damaged log.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the raw bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogBackend for MemoryLog {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if offset > size || end > data.len() {
            return Err(StoreError::ReadPastEnd { offset, len, size });
        }
        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StoreResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {}", data.len(), new_size),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
