//! Journal backend trait definition.

use crate::error::JournalResult;

/// A byte store underneath a [`crate::Journal`].
///
/// Backends are opaque: they append, read back and flush bytes, and know
/// nothing about frames or the records inside them.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `flush` returns, appended data survives process termination
/// - `rewrite` replaces the whole content in one step; readers observe
///   either the old bytes or the new bytes, never a mix
pub trait JournalBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::JournalError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>>;

    /// Appends data to the end and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> JournalResult<u64>;

    /// Pushes appended data to durable storage.
    fn flush(&mut self) -> JournalResult<()>;

    /// Syncs data and metadata (size) to durable storage.
    fn sync(&mut self) -> JournalResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> JournalResult<u64>;

    /// Truncates to `new_size` bytes. Used to drop a torn tail frame.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> JournalResult<()>;

    /// Atomically replaces the whole content with `data`.
    ///
    /// Used by compaction.
    fn rewrite(&mut self, data: &[u8]) -> JournalResult<()>;

    /// Reads the whole content.
    fn read_all(&self) -> JournalResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "journal exceeds address space")
        })?;
        self.read_at(0, len)
    }
}
