//! In-memory journal backend.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal backend held in memory.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// journal built on top of it and reopen a fresh journal over the same
/// bytes to simulate a restart.
///
/// ```rust
/// use fieldsync_journal::{InMemoryBackend, JournalBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"frame").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 5);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over pre-existing bytes.
    ///
    /// Useful for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites one byte. Test hook for corruption scenarios.
    pub fn corrupt_byte(&self, offset: usize) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte ^= 0xFF;
        }
    }
}

impl JournalBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(JournalError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> JournalResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> JournalResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> JournalResult<()> {
        Ok(())
    }

    fn size(&self) -> JournalResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> JournalResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;
        if new_size > current {
            return Err(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, journal holds {current} bytes"),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn rewrite(&mut self, bytes: &[u8]) -> JournalResult<()> {
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}
