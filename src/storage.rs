// Storage module - File-system surface used by the writer

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// An open, append-only output stream
pub trait ActiveFile: Write + Send {
    /// Force written bytes to stable storage
    fn sync(&mut self) -> io::Result<()>;
}

/// File-system operations the writer depends on
///
/// Every side effect of opening, rotating and closing goes through this
/// trait, so the rotation state machine can run against [`MemoryStorage`].
pub trait Storage: Send + Sync {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    /// Open `path` for appending, creating it if absent
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn ActiveFile>>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `contents` to `path`, truncating any prior content
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Storage backed by the local file system
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl ActiveFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Storage for LocalStorage {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn ActiveFile>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    dirs: HashSet<PathBuf>,
    files: HashMap<PathBuf, Vec<u8>>,
    syncs: usize,
    fail_next_open: bool,
    fail_next_sync: bool,
    fail_next_write: bool,
    fail_next_persist: bool,
    short_write: Option<usize>,
}

/// In-memory storage with fault injection, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

fn injected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Contents of a stored file
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    pub fn dir_exists(&self, dir: &Path) -> bool {
        self.lock().dirs.contains(dir)
    }

    /// All stored file paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.lock().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of successful syncs across all files
    pub fn sync_count(&self) -> usize {
        self.lock().syncs
    }

    /// Store a file directly, bypassing fault injection
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.into(), contents.into());
    }

    pub fn fail_next_open(&self) {
        self.lock().fail_next_open = true;
    }

    pub fn fail_next_sync(&self) {
        self.lock().fail_next_sync = true;
    }

    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }

    /// Make the next truncating `write` (metadata persistence) fail
    pub fn fail_next_persist(&self) {
        self.lock().fail_next_persist = true;
    }

    /// Cap the next append to at most `limit` bytes
    pub fn short_next_write(&self, limit: usize) {
        self.lock().short_write = Some(limit);
    }
}

impl Storage for MemoryStorage {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        self.lock().dirs.insert(dir.to_path_buf());
        Ok(())
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn ActiveFile>> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_open) {
            return Err(injected("open"));
        }
        inner.files.entry(path.to_path_buf()).or_default();
        Ok(Box::new(MemoryFile {
            path: path.to_path_buf(),
            storage: self.clone(),
        }))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_persist) {
            return Err(injected("persist"));
        }
        inner.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

struct MemoryFile {
    path: PathBuf,
    storage: MemoryStorage,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.storage.lock();
        if std::mem::take(&mut inner.fail_next_write) {
            return Err(injected("write"));
        }
        let n = match inner.short_write.take() {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        inner
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ActiveFile for MemoryFile {
    fn sync(&mut self) -> io::Result<()> {
        let mut inner = self.storage.lock();
        if std::mem::take(&mut inner.fail_next_sync) {
            return Err(injected("sync"));
        }
        inner.syncs += 1;
        Ok(())
    }
}
