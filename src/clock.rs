// Clock module - Time source used for rotation decisions

use chrono::{DateTime, Duration, Local, TimeZone};
use std::sync::{Arc, Mutex};

/// Source of wall-clock time for the writer
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock, shared between clones
///
/// Useful for exercising time-based rotation without sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given Unix timestamp in seconds
    pub fn from_unix_secs(secs: i64) -> Self {
        Self::new(Local.timestamp_opt(secs, 0).single().unwrap_or_else(Local::now))
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = *current + by;
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Local>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
