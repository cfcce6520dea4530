use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the rotating writer
#[derive(Debug, Error)]
pub enum RotalogError {
    // Configuration errors
    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Environment errors
    #[error("Failed to create log directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("Failed to open log file {path}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },

    #[error("Failed to append to log file: {0}")]
    Write(io::Error),

    #[error("Failed to sync log file: {0}")]
    Sync(io::Error),

    /// The bytes were appended but the follow-up sync failed.
    #[error("Wrote {written} bytes but failed to sync them: {source}")]
    NotDurable { written: usize, source: io::Error },

    #[error("Failed to read metadata file: {0}")]
    MetaRead(io::Error),

    #[error("Failed to persist metadata file: {0}")]
    MetaPersist(io::Error),

    // State misuse
    #[error("Writer is closed")]
    WriterClosed,

    #[error("Writer lock poisoned")]
    LockPoisoned,

    #[error("Background write task failed: {0}")]
    TaskFailed(String),
}

impl RotalogError {
    /// True when the error comes from operating on a closed writer
    pub fn is_closed(&self) -> bool {
        matches!(self, RotalogError::WriterClosed)
    }
}

impl From<RotalogError> for io::Error {
    fn from(err: RotalogError) -> Self {
        match err {
            RotalogError::Write(e)
            | RotalogError::Sync(e)
            | RotalogError::MetaRead(e)
            | RotalogError::MetaPersist(e) => e,
            RotalogError::WriterClosed => io::Error::new(io::ErrorKind::Other, "writer is closed"),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Result type alias for rotalog operations
pub type Result<T> = std::result::Result<T, RotalogError>;
