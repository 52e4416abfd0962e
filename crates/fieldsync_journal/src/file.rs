//! File-based journal backend.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal backend stored in a single file.
///
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()` so data and size are on disk
/// - `rewrite()` writes a sibling `*.tmp` file, syncs it and renames it
///   over the journal, so a crash leaves either the old or the new file
///
/// # Example
///
/// ```no_run
/// use fieldsync_journal::{FileBackend, JournalBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("actions.journal")).unwrap();
/// backend.append(b"frame bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> JournalResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, size }),
        })
    }

    /// Opens or creates the journal file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> JournalResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> JournalResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl JournalBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(JournalError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> JournalResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if data.is_empty() {
            return Ok(offset);
        }

        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> JournalResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> JournalResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> JournalResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_size: u64) -> JournalResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to {new_size} bytes, journal holds {} bytes",
                    inner.size
                ),
            )));
        }

        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> JournalResult<()> {
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        let file = Self::open_file(&self.path)?;
        let inner = self.inner.get_mut();
        inner.size = file.metadata()?.len();
        inner.file = file;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("actions.journal");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("j")).unwrap();

        assert_eq!(backend.append(b"check").unwrap(), 0);
        assert_eq!(backend.append(b"-in").unwrap(), 5);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"check-in");
        assert_eq!(backend.read_at(6, 2).unwrap(), b"in");
        assert!(matches!(
            backend.read_at(4, 10),
            Err(JournalError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"ticket").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"ticket");
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("j")).unwrap();
        backend.append(b"abcdef").unwrap();

        backend.truncate(3).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"abc");
        assert!(backend.truncate(10).is_err());
    }

    #[test]
    fn rewrite_replaces_content_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"stale stale stale").unwrap();

        backend.rewrite(b"live").unwrap();
        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.append(b"!").unwrap(), 4);
        assert_eq!(backend.read_all().unwrap(), b"live!");
        assert!(!dir.path().join("j.tmp").exists());

        drop(backend);
        assert_eq!(fs::read(&path).unwrap(), b"live!");
    }

    #[test]
    fn create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crew").join("outbox").join("j");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }
}
