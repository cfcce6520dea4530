// Meta module - Sidecar record that lets a restarted writer resume its active file

use crate::error::{RotalogError, Result};
use crate::storage::{ActiveFile, Storage};
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Fixed name of the sidecar file inside the log directory
pub const META_FILE_NAME: &str = "meta";

/// Active file state persisted across a clean close/open cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub active_path: PathBuf,
    pub bytes_written: u64,
    pub last_write_nanos: i64,
}

impl MetaRecord {
    /// Three lines: path, byte counter, Unix nanoseconds (no trailing newline)
    ///
    /// The path is stored as its raw OS bytes, so non-UTF-8 names survive
    /// the round trip on Unix.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = path_to_bytes(&self.active_path).into_owned();
        let counters = format!("\n{}\n{}", self.bytes_written, self.last_write_nanos);
        out.extend_from_slice(counters.as_bytes());
        out
    }
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

// Non-Unix paths are stored as UTF-8; names that are not valid Unicode are
// written lossily and will not resume to the same file.
#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(bytes).ok().map(PathBuf::from)
}

/// Outcome of inspecting a sidecar file's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Resumed(MetaRecord),
    Fresh,
}

/// Decide whether `data` describes a resumable active file
///
/// Anything that is not exactly three fields with numeric counters is
/// treated as absent state.
pub fn classify_recovery(data: &[u8]) -> Recovery {
    let fields: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    let [path, written, nanos] = fields.as_slice() else {
        return Recovery::Fresh;
    };

    if path.is_empty() {
        return Recovery::Fresh;
    }

    let parsed = (
        path_from_bytes(path),
        parse_field::<u64>(written),
        parse_field::<i64>(nanos),
    );
    match parsed {
        (Some(active_path), Some(bytes_written), Some(last_write_nanos)) => {
            Recovery::Resumed(MetaRecord {
                active_path,
                bytes_written,
                last_write_nanos,
            })
        }
        _ => Recovery::Fresh,
    }
}

fn parse_field<T: std::str::FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// An active file reopened from a sidecar record
pub struct ResumedFile {
    pub file: Box<dyn ActiveFile>,
    pub record: MetaRecord,
}

impl fmt::Debug for ResumedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumedFile")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Reads and writes the sidecar record in a log directory
pub struct MetaStore<'a> {
    storage: &'a dyn Storage,
    path: PathBuf,
}

impl<'a> MetaStore<'a> {
    pub fn new(storage: &'a dyn Storage, dir: &Path) -> Self {
        Self {
            storage,
            path: dir.join(META_FILE_NAME),
        }
    }

    /// Path to the sidecar file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopen the active file recorded at the last clean close, if any
    ///
    /// A missing or malformed sidecar yields `Ok(None)`. Failing to read the
    /// sidecar or to open the recorded file is an error. The sidecar is
    /// removed once the file is reopened.
    pub fn resume(&self) -> Result<Option<ResumedFile>> {
        let data = match self.storage.read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RotalogError::MetaRead(e)),
        };

        let record = match classify_recovery(&data) {
            Recovery::Resumed(record) => record,
            Recovery::Fresh => {
                tracing::warn!(
                    "Discarding malformed metadata at {}, starting a fresh log file",
                    self.path.display()
                );
                return Ok(None);
            }
        };

        let file = self
            .storage
            .open_append(&record.active_path)
            .map_err(|source| RotalogError::OpenFile {
                path: record.active_path.clone(),
                source,
            })?;

        if let Err(e) = self.storage.remove(&self.path) {
            tracing::warn!("Failed to remove metadata at {}: {}", self.path.display(), e);
        }

        Ok(Some(ResumedFile { file, record }))
    }

    /// Write the record, replacing any previous sidecar
    pub fn persist(&self, record: &MetaRecord) -> Result<()> {
        self.storage
            .write(&self.path, &record.encode())
            .map_err(RotalogError::MetaPersist)
    }
}
