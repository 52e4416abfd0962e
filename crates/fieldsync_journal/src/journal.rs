//! Append-only record journal.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use crate::frame::{encode_frame, scan_frames, Frame, FrameKind};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// An append-only log of CBOR-encoded records.
///
/// Owners rebuild their state by replaying [`Journal::recover`] on open and
/// then append one record per mutation. Every append is flushed and synced
/// to disk before it returns unless `sync_on_write` is turned off.
pub struct Journal {
    backend: Mutex<Box<dyn JournalBackend>>,
    sync_on_write: bool,
}

impl Journal {
    /// Creates a journal over `backend` that syncs after every append.
    pub fn new(backend: Box<dyn JournalBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write: true,
        }
    }

    /// Sets whether every append is followed by `fsync`.
    ///
    /// Turning it off trades durability of the latest records on power
    /// loss for append throughput.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Encodes and appends a record, returning its frame offset.
    ///
    /// # Errors
    ///
    /// Fails if encoding or the backend write fails.
    pub fn append<T: Serialize>(&self, record: &T) -> JournalResult<u64> {
        let payload = encode_record(record)?;
        let frame = encode_frame(FrameKind::Record, &payload)?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&frame)?;
        backend.flush()?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Reads every valid frame without modifying the backend.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or corrupted frames.
    pub fn frames(&self) -> JournalResult<Vec<Frame>> {
        let data = self.backend.lock().read_all()?;
        Ok(scan_frames(&data)?.frames)
    }

    /// Decodes every record in order without modifying the backend.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, corrupted frames or undecodable records.
    pub fn read_all<T: DeserializeOwned>(&self) -> JournalResult<Vec<T>> {
        self.frames()?
            .iter()
            .map(|frame| decode_record(frame))
            .collect()
    }

    /// Decodes every record and drops a torn tail left by an interrupted
    /// append, so later appends start on a frame boundary.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, corrupted frames or undecodable records.
    pub fn recover<T: DeserializeOwned>(&self) -> JournalResult<Vec<T>> {
        let mut backend = self.backend.lock();
        let data = backend.read_all()?;
        let scan = scan_frames(&data)?;

        let total = data.len() as u64;
        if scan.has_torn_tail(total) {
            warn!(
                valid_len = scan.valid_len,
                dropped = total - scan.valid_len,
                "dropping torn journal tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        scan.frames.iter().map(decode_record).collect()
    }

    /// Replaces the journal with exactly `records`.
    ///
    /// # Errors
    ///
    /// Fails if encoding or the backend rewrite fails.
    pub fn rewrite<T: Serialize>(&self, records: &[T]) -> JournalResult<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend(encode_frame(FrameKind::Record, &encode_record(record)?)?);
        }
        self.backend.lock().rewrite(&data)
    }

    /// Returns true if appends are synced to disk.
    pub fn syncs_on_write(&self) -> bool {
        self.sync_on_write
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn size(&self) -> JournalResult<u64> {
        self.backend.lock().size()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn encode_record<T: Serialize>(record: &T) -> JournalResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| JournalError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes the CBOR record carried by `frame`.
///
/// # Errors
///
/// Returns [`JournalError::Codec`] if the payload does not decode as `T`.
pub fn decode_record<T: DeserializeOwned>(frame: &Frame) -> JournalResult<T> {
    ciborium::from_reader(frame.payload.as_slice()).map_err(|e| {
        JournalError::Codec(format!("record at offset {}: {e}", frame.offset))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Event {
        Added { id: u32, note: String },
        Removed { id: u32 },
    }

    fn journal_over(backend: &InMemoryBackend) -> Journal {
        Journal::new(Box::new(backend.clone()))
    }

    #[test]
    fn append_then_read_in_order() {
        let backend = InMemoryBackend::new();
        let journal = journal_over(&backend);

        let first = journal
            .append(&Event::Added {
                id: 1,
                note: "crew on site".into(),
            })
            .unwrap();
        let second = journal.append(&Event::Removed { id: 1 }).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let events: Vec<Event> = journal.read_all().unwrap();
        assert_eq!(
            events,
            vec![
                Event::Added {
                    id: 1,
                    note: "crew on site".into()
                },
                Event::Removed { id: 1 },
            ]
        );
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let backend = InMemoryBackend::new();
        let journal = journal_over(&backend);
        journal.append(&Event::Removed { id: 7 }).unwrap();
        let valid = journal.size().unwrap();

        let mut torn = backend.data();
        torn.extend_from_slice(&FRAME_START);
        let reopened = Journal::new(Box::new(InMemoryBackend::with_data(torn)));

        let events: Vec<Event> = reopened.recover().unwrap();
        assert_eq!(events, vec![Event::Removed { id: 7 }]);
        assert_eq!(reopened.size().unwrap(), valid);

        reopened.append(&Event::Removed { id: 8 }).unwrap();
        assert_eq!(reopened.read_all::<Event>().unwrap().len(), 2);
    }

    const FRAME_START: [u8; 6] = [b'F', b'S', b'J', b'R', 1, 0];

    #[test]
    fn corruption_is_reported() {
        let backend = InMemoryBackend::new();
        let journal = journal_over(&backend);
        journal.append(&Event::Removed { id: 3 }).unwrap();
        backend.corrupt_byte(crate::frame::HEADER_SIZE + 1);

        assert!(matches!(
            journal.recover::<Event>(),
            Err(JournalError::Corrupted { .. })
        ));
    }

    #[test]
    fn rewrite_keeps_only_given_records() {
        let backend = InMemoryBackend::new();
        let journal = journal_over(&backend);
        for id in 0..5 {
            journal.append(&Event::Removed { id }).unwrap();
        }

        journal.rewrite(&[Event::Removed { id: 4 }]).unwrap();
        assert_eq!(
            journal.read_all::<Event>().unwrap(),
            vec![Event::Removed { id: 4 }]
        );
    }

    /// Counts `sync` calls on top of an in-memory buffer.
    struct SyncCounting {
        inner: InMemoryBackend,
        syncs: Arc<AtomicUsize>,
    }

    impl JournalBackend for SyncCounting {
        fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> JournalResult<u64> {
            self.inner.append(data)
        }
        fn flush(&mut self) -> JournalResult<()> {
            self.inner.flush()
        }
        fn sync(&mut self) -> JournalResult<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            self.inner.sync()
        }
        fn size(&self) -> JournalResult<u64> {
            self.inner.size()
        }
        fn truncate(&mut self, new_size: u64) -> JournalResult<()> {
            self.inner.truncate(new_size)
        }
        fn rewrite(&mut self, data: &[u8]) -> JournalResult<()> {
            self.inner.rewrite(data)
        }
    }

    fn counting() -> (Box<SyncCounting>, Arc<AtomicUsize>) {
        let syncs = Arc::new(AtomicUsize::new(0));
        let backend = SyncCounting {
            inner: InMemoryBackend::new(),
            syncs: Arc::clone(&syncs),
        };
        (Box::new(backend), syncs)
    }

    #[test]
    fn every_append_is_synced_by_default() {
        let (backend, syncs) = counting();
        let journal = Journal::new(backend);
        assert!(journal.syncs_on_write());

        for id in 0..3 {
            journal.append(&Event::Removed { id }).unwrap();
        }
        assert_eq!(syncs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sync_can_be_turned_off() {
        let (backend, syncs) = counting();
        let journal = Journal::new(backend).with_sync_on_write(false);

        journal.append(&Event::Removed { id: 1 }).unwrap();
        assert_eq!(syncs.load(Ordering::SeqCst), 0);
        assert_eq!(journal.read_all::<Event>().unwrap().len(), 1);
    }

    #[test]
    fn wrong_record_type_is_codec_error() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.append(&"just a string").unwrap();

        assert!(matches!(
            journal.read_all::<Event>(),
            Err(JournalError::Codec(_))
        ));
    }
}
