// Writer module - Append-only writer that rotates its active file by size and age

mod async_writer;

pub use async_writer::AsyncRotatingWriter;

use crate::config::Options;
use crate::error::{RotalogError, Result};
use crate::meta::{MetaRecord, MetaStore};
use crate::storage::ActiveFile;
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Why the active file is being replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateTrigger {
    /// No active file yet, or no resumable one
    Fresh,
    /// Active file reached the size threshold
    Size,
    /// Last write is older than the rotation age
    Age,
    /// Requested through [`RotatingWriter::rotate_now`]
    Manual,
}

impl fmt::Display for RotateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotateTrigger::Fresh => "fresh",
            RotateTrigger::Size => "size",
            RotateTrigger::Age => "age",
            RotateTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

fn unix_nanos(t: DateTime<Local>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

struct Active {
    path: PathBuf,
    file: Box<dyn ActiveFile>,
}

/// Mutable writer state, only touched under the writer's lock
struct WriterState {
    /// `None` only once the writer is closed
    active: Option<Active>,
    bytes_written: u64,
    last_write_nanos: i64,
    closed: bool,
}

impl WriterState {
    fn rotation_trigger(&self, options: &Options, now: DateTime<Local>) -> Option<RotateTrigger> {
        if options.max_file_size > 0 && self.bytes_written >= options.max_file_size {
            return Some(RotateTrigger::Size);
        }

        if !options.rotate_after.is_zero() {
            let elapsed = i128::from(unix_nanos(now)) - i128::from(self.last_write_nanos);
            // as_nanos() of any Duration fits in i128
            if elapsed >= options.rotate_after.as_nanos() as i128 {
                return Some(RotateTrigger::Age);
            }
        }

        None
    }

    /// Replace the active file with a freshly named one
    ///
    /// The old file stays active until the new one is open, so a failed
    /// rotation leaves the writer usable.
    fn rotate(
        &mut self,
        options: &Options,
        now: DateTime<Local>,
        trigger: RotateTrigger,
    ) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            active.file.sync().map_err(RotalogError::Sync)?;
        }

        let path = options.file_path_for(now);
        let file = options
            .storage
            .open_append(&path)
            .map_err(|source| RotalogError::OpenFile {
                path: path.clone(),
                source,
            })?;

        match self.active.replace(Active { path, file }) {
            Some(old) => tracing::info!(
                "Rotated log file {} -> {} ({})",
                old.path.display(),
                self.active_path_display(),
                trigger
            ),
            None => tracing::info!("Opened log file {} ({})", self.active_path_display(), trigger),
        }

        self.bytes_written = 0;
        self.last_write_nanos = unix_nanos(now);

        Ok(())
    }

    fn active_path_display(&self) -> String {
        self.active
            .as_ref()
            .map(|a| a.path.display().to_string())
            .unwrap_or_default()
    }

    fn active_mut(&mut self) -> Result<&mut Active> {
        if self.closed {
            return Err(RotalogError::WriterClosed);
        }
        self.active.as_mut().ok_or(RotalogError::WriterClosed)
    }

    fn write(&mut self, options: &Options, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(RotalogError::WriterClosed);
        }

        let now = options.clock.now();
        if let Some(trigger) = self.rotation_trigger(options, now) {
            self.rotate(options, now, trigger)?;
        }

        let active = self.active_mut()?;
        let written = active.file.write(buf).map_err(RotalogError::Write)?;

        // Counters reflect the bytes that actually reached the file
        self.bytes_written = self.bytes_written.saturating_add(written as u64);
        self.last_write_nanos = self.last_write_nanos.max(unix_nanos(now));

        if self.bytes_written >= options.sync_threshold {
            let active = self.active_mut()?;
            active
                .file
                .sync()
                .map_err(|source| RotalogError::NotDurable { written, source })?;
        }

        Ok(written)
    }

    fn close(&mut self, options: &Options) -> Result<()> {
        let record = MetaRecord {
            active_path: self.active_mut()?.path.clone(),
            bytes_written: self.bytes_written,
            last_write_nanos: self.last_write_nanos,
        };

        // The sidecar must only exist once the active file is durable
        self.active_mut()?.file.sync().map_err(RotalogError::Sync)?;
        MetaStore::new(options.storage.as_ref(), &options.dir).persist(&record)?;

        // Dropping the handle closes the file
        self.active = None;
        self.closed = true;

        tracing::info!(
            "Closed log file {} at {} bytes",
            record.active_path.display(),
            record.bytes_written
        );
        Ok(())
    }
}

/// Thread-safe, append-only writer that spreads records across rotating files
///
/// Every operation runs under a single lock, so concurrent writes are applied
/// one at a time in the order they acquire it. A clean [`close`] records the
/// active file in a sidecar so the next [`open`] on the same directory keeps
/// appending to it.
///
/// [`close`]: RotatingWriter::close
/// [`open`]: RotatingWriter::open
pub struct RotatingWriter {
    options: Options,
    state: Mutex<WriterState>,
}

impl RotatingWriter {
    /// Open a writer, resuming the previous active file when possible
    ///
    /// # Returns
    /// * `Ok(RotatingWriter)` - Writer with an open active file
    /// * `Err(RotalogError)` - Missing directory, or a storage failure while
    ///   creating the directory, reading the sidecar or opening a file
    pub fn open(mut options: Options) -> Result<Self> {
        options.normalize()?;

        options
            .storage
            .create_dir_all(&options.dir)
            .map_err(|source| RotalogError::CreateDirectory {
                path: options.dir.clone(),
                source,
            })?;

        let now = options.clock.now();
        let resumed = MetaStore::new(options.storage.as_ref(), &options.dir).resume()?;

        let mut state = match resumed {
            Some(resumed) => {
                tracing::info!(
                    "Resuming log file {} at {} bytes",
                    resumed.record.active_path.display(),
                    resumed.record.bytes_written
                );
                WriterState {
                    active: Some(Active {
                        path: resumed.record.active_path,
                        file: resumed.file,
                    }),
                    bytes_written: resumed.record.bytes_written,
                    last_write_nanos: resumed.record.last_write_nanos,
                    closed: false,
                }
            }
            None => WriterState {
                active: None,
                bytes_written: 0,
                last_write_nanos: unix_nanos(now),
                closed: false,
            },
        };

        let trigger = if state.active.is_none() {
            Some(RotateTrigger::Fresh)
        } else {
            state.rotation_trigger(&options, now)
        };
        if let Some(trigger) = trigger {
            state.rotate(&options, now, trigger)?;
        }

        Ok(Self {
            options,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState>> {
        self.state.lock().map_err(|_| RotalogError::LockPoisoned)
    }

    fn lock_for_read(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `buf` to the active file, rotating first if due
    ///
    /// Returns the number of bytes the file accepted, which may be less than
    /// `buf.len()`. A [`RotalogError::NotDurable`] error means the bytes were
    /// appended but could not be synced.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.lock()?.write(&self.options, buf)
    }

    /// Persist the sidecar record and release the active file
    ///
    /// On failure the writer stays open and `close` may be retried.
    pub fn close(&self) -> Result<()> {
        self.lock()?.close(&self.options)
    }

    /// Force the active file to stable storage
    pub fn sync(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.active_mut()?.file.sync().map_err(RotalogError::Sync)
    }

    /// Rotate immediately, regardless of thresholds
    pub fn rotate_now(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(RotalogError::WriterClosed);
        }
        let now = self.options.clock.now();
        state.rotate(&self.options, now, RotateTrigger::Manual)
    }

    /// Whether the next write would rotate first
    pub fn should_rotate(&self) -> bool {
        let state = self.lock_for_read();
        !state.closed
            && state
                .rotation_trigger(&self.options, self.options.clock.now())
                .is_some()
    }

    /// Path of the active file, `None` once closed
    pub fn active_path(&self) -> Option<PathBuf> {
        self.lock_for_read().active.as_ref().map(|a| a.path.clone())
    }

    /// Bytes appended to the active file since it was opened or rotated
    pub fn bytes_written(&self) -> u64 {
        self.lock_for_read().bytes_written
    }

    /// Time of the last write to the active file
    pub fn last_write(&self) -> DateTime<Local> {
        Local.timestamp_nanos(self.lock_for_read().last_write_nanos)
    }

    pub fn is_closed(&self) -> bool {
        self.lock_for_read().closed
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("options", &self.options)
            .field("active_path", &self.active_path())
            .field("bytes_written", &self.bytes_written())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl io::Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingWriter::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::sync(*self).map_err(Into::into)
    }
}

impl io::Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}
