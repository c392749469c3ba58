//! Filesystem access used by the reader and the watcher.
//!
//! Two capabilities are needed: opening a file as a seekable byte stream, and
//! querying its size and modification time. [`OsFs`] forwards to `std::fs`;
//! [`MemFs`] keeps files in memory so watcher timing can be tested without
//! touching the disk.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// The subset of file metadata the watcher compares between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub len: u64,
    pub modified: SystemTime,
}

/// Stream-open and metadata-query capabilities.
pub trait FileSystem: Send + Sync + 'static {
    type File: Read + Seek + Send + 'static;

    /// Open `path` for reading.
    fn open(&self, path: &Path) -> io::Result<Self::File>;

    /// Query size and modification time for `path`.
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata>;
}

/// The real operating system filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl FileSystem for OsFs {
    type File = std::fs::File;

    fn open(&self, path: &Path) -> io::Result<Self::File> {
        std::fs::File::open(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileMetadata {
            len: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

#[derive(Debug)]
struct MemEntry {
    data: Vec<u8>,
    modified: SystemTime,
}

/// An in-memory filesystem.
///
/// Clones share the same storage, so a test can hold one handle for writing
/// while a watcher or reader holds another. Every mutation bumps the file's
/// modification time by at least one nanosecond, which keeps successive
/// writes distinguishable even when the size does not change.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: Arc<Mutex<HashMap<PathBuf, MemEntry>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, MemEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an empty file, truncating it if it already exists.
    pub fn create(&self, path: impl AsRef<Path>) {
        let mut files = self.lock();
        let modified = next_modified(files.get(path.as_ref()));
        files.insert(
            path.as_ref().to_path_buf(),
            MemEntry {
                data: Vec::new(),
                modified,
            },
        );
    }

    /// Append bytes to a file, creating it if needed.
    pub fn append(&self, path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) {
        let mut files = self.lock();
        let path = path.as_ref().to_path_buf();
        let modified = next_modified(files.get(&path));
        let entry = files.entry(path).or_insert_with(|| MemEntry {
            data: Vec::new(),
            modified,
        });
        entry.data.extend_from_slice(bytes.as_ref());
        entry.modified = modified;
    }

    /// Update the modification time without changing the contents.
    pub fn touch(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut files = self.lock();
        let entry = files
            .get_mut(path.as_ref())
            .ok_or_else(|| not_found(path.as_ref()))?;
        let modified = next_modified(Some(&*entry));
        entry.modified = modified;
        Ok(())
    }

    /// Remove a file. Open handles keep failing reads afterwards.
    pub fn remove(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.lock()
            .remove(path.as_ref())
            .map(|_| ())
            .ok_or_else(|| not_found(path.as_ref()))
    }

    /// Current contents of a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().get(path.as_ref()).map(|entry| entry.data.clone())
    }
}

impl FileSystem for MemFs {
    type File = MemFile;

    fn open(&self, path: &Path) -> io::Result<Self::File> {
        if !self.lock().contains_key(path) {
            return Err(not_found(path));
        }
        Ok(MemFile {
            fs: self.clone(),
            path: path.to_path_buf(),
            position: 0,
        })
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        self.lock()
            .get(path)
            .map(|entry| FileMetadata {
                len: entry.data.len() as u64,
                modified: entry.modified,
            })
            .ok_or_else(|| not_found(path))
    }
}

/// A read handle into a [`MemFs`] file. Reads observe appends made after open.
#[derive(Debug)]
pub struct MemFile {
    fs: MemFs,
    path: PathBuf,
    position: u64,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let files = self.fs.lock();
        let entry = files.get(&self.path).ok_or_else(|| not_found(&self.path))?;
        let start = usize::try_from(self.position)
            .unwrap_or(usize::MAX)
            .min(entry.data.len());
        let available = &entry.data[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self
            .fs
            .lock()
            .get(&self.path)
            .map(|entry| entry.data.len() as u64)
            .ok_or_else(|| not_found(&self.path))?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative offset")
        })?;
        self.position = target;
        Ok(target)
    }
}

fn next_modified(previous: Option<&MemEntry>) -> SystemTime {
    let now = SystemTime::now();
    match previous {
        Some(entry) if now <= entry.modified => entry.modified + Duration::from_nanos(1),
        _ => now,
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    )
}
