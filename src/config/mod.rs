use crate::clock::{Clock, SystemClock};
use crate::error::{RotalogError, Result};
use crate::storage::{LocalStorage, Storage};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default file extension for log files
pub const DEFAULT_EXTENSION: &str = "log";

/// Default age of the active file before rotation (48h)
pub const DEFAULT_ROTATE_AFTER: Duration = Duration::from_secs(48 * 60 * 60);

/// Default maximum active file size before rotation (10MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Format used by the default namer
pub const DEFAULT_NAME_FORMAT: &str = "%Y_%m_%d_T_%H_%M_%S";

/// Maps a rotation instant and an extension to a file name
pub type Namer = Arc<dyn Fn(DateTime<Local>, &str) -> String + Send + Sync>;

/// Namer producing `YYYY_MM_DD_T_HH_MM_SS.<ext>`
pub fn default_namer() -> Namer {
    Arc::new(|t: DateTime<Local>, ext: &str| {
        format!("{}.{}", t.format(DEFAULT_NAME_FORMAT), ext)
    })
}

/// Immutable writer configuration, fixed at construction
#[derive(Clone)]
pub struct Options {
    /// Directory holding the log files and the metadata sidecar
    pub dir: PathBuf,

    /// Extension passed to the namer
    pub extension: String,

    /// Age of the last write after which the active file is rotated, disabled if zero
    pub rotate_after: Duration,

    /// Size in bytes at which the active file is rotated, disabled if zero
    pub max_file_size: u64,

    /// Bytes written to the active file after which every write is synced,
    /// zero syncs always
    pub sync_threshold: u64,

    pub namer: Namer,
    pub clock: Arc<dyn Clock>,
    pub storage: Arc<dyn Storage>,
}

impl Options {
    /// Options with default thresholds for the given directory
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            extension: DEFAULT_EXTENSION.to_string(),
            rotate_after: DEFAULT_ROTATE_AFTER,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sync_threshold: 0,
            namer: default_namer(),
            clock: Arc::new(SystemClock),
            storage: Arc::new(LocalStorage),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_rotate_after(mut self, rotate_after: Duration) -> Self {
        self.rotate_after = rotate_after;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_sync_threshold(mut self, sync_threshold: u64) -> Self {
        self.sync_threshold = sync_threshold;
        self
    }

    pub fn with_namer<F>(mut self, namer: F) -> Self
    where
        F: Fn(DateTime<Local>, &str) -> String + Send + Sync + 'static,
    {
        self.namer = Arc::new(namer);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// Check required fields and fill in defaults for empty ones
    pub(crate) fn normalize(&mut self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(RotalogError::MissingConfigField("dir".to_string()));
        }
        if self.extension.is_empty() {
            self.extension = DEFAULT_EXTENSION.to_string();
        }
        Ok(())
    }

    /// Path of the file the namer assigns to `t`
    pub fn file_path_for(&self, t: DateTime<Local>) -> PathBuf {
        self.dir.join((self.namer)(t, &self.extension))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("dir", &self.dir)
            .field("extension", &self.extension)
            .field("rotate_after", &self.rotate_after)
            .field("max_file_size", &self.max_file_size)
            .field("sync_threshold", &self.sync_threshold)
            .finish_non_exhaustive()
    }
}

/// Serializable writer configuration, loadable from TOML or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Directory for log files (created if absent)
    pub dir: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,

    /// Rotation age in seconds, 0 disables
    #[serde(default = "default_rotate_after_secs")]
    pub rotate_after_secs: u64,

    /// Rotation size in bytes, 0 disables
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Sync threshold in bytes, 0 syncs every write
    #[serde(default)]
    pub sync_threshold: u64,
}

// Default value functions for serde
fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_rotate_after_secs() -> u64 {
    DEFAULT_ROTATE_AFTER.as_secs()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl WriterConfig {
    /// Config with default thresholds for the given directory
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            extension: default_extension(),
            rotate_after_secs: default_rotate_after_secs(),
            max_file_size: default_max_file_size(),
            sync_threshold: 0,
        }
    }

    /// Load a writer configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RotalogError::InvalidConfig(format!("Failed to read config file: {}", e))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(RotalogError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.dir = expand_env_in_path(&config.dir);
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML config, either flat or under a `[writer]` table
    fn parse_toml(contents: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct ConfigFile {
            writer: Option<WriterConfig>,
            #[serde(flatten)]
            flat: Option<WriterConfig>,
        }

        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| RotalogError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        file.writer.or(file.flat).ok_or_else(|| {
            RotalogError::InvalidConfig("No writer configuration found in file".to_string())
        })
    }

    fn parse_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| RotalogError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(RotalogError::MissingConfigField("dir".to_string()));
        }

        if self.extension.contains(std::path::MAIN_SEPARATOR) || self.extension.contains('/') {
            return Err(RotalogError::ConfigValidationError(format!(
                "extension must not contain a path separator: {}",
                self.extension
            )));
        }

        Ok(())
    }

    pub fn rotate_after(&self) -> Duration {
        Duration::from_secs(self.rotate_after_secs)
    }

    /// Build writer options with the default namer, clock and storage
    pub fn into_options(self) -> Options {
        let rotate_after = self.rotate_after();
        Options::new(self.dir)
            .with_extension(self.extension)
            .with_rotate_after(rotate_after)
            .with_max_file_size(self.max_file_size)
            .with_sync_threshold(self.sync_threshold)
    }
}

/// Expand `$VAR` and `${VAR}` in a path
fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Expand `$VAR` and `${VAR}`, leaving unset variables untouched
///
/// A bare `$VAR` takes the longest run of `[A-Za-z0-9_]`, so `$HOMEDIR`
/// never expands `$HOME`.
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => result.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_options_defaults() {
        let options = Options::new("/var/log/app");
        assert_eq!(options.extension, "log");
        assert_eq!(options.rotate_after, Duration::from_secs(172_800));
        assert_eq!(options.max_file_size, 10 * 1024 * 1024);
        assert_eq!(options.sync_threshold, 0);
    }

    #[test]
    fn test_default_namer_format() {
        let t = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let name = default_namer()(t, "log");
        assert_eq!(name, "2024_03_05_T_07_08_09.log");
    }

    #[test]
    fn test_normalize_requires_dir() {
        let mut options = Options::new("");
        let result = options.normalize();
        assert!(matches!(result, Err(RotalogError::MissingConfigField(_))));
    }

    #[test]
    fn test_normalize_fills_empty_extension() {
        let mut options = Options::new("/tmp/x").with_extension("");
        options.normalize().unwrap();
        assert_eq!(options.extension, "log");
    }

    #[test]
    fn test_file_path_for_uses_custom_namer() {
        let options = Options::new("/logs")
            .with_extension("txt")
            .with_namer(|t, ext| format!("app-{}.{}", t.timestamp(), ext));
        let t = Local.timestamp_opt(100, 0).unwrap();
        assert_eq!(options.file_path_for(t), PathBuf::from("/logs/app-100.txt"));
    }

    #[test]
    fn test_parse_toml_flat() {
        let config = WriterConfig::parse_toml(
            r#"
dir = "/var/log/app"
max_file_size = 1024
"#,
        )
        .unwrap();

        assert_eq!(config.dir, PathBuf::from("/var/log/app"));
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.extension, "log");
        assert_eq!(config.rotate_after_secs, 172_800);
    }

    #[test]
    fn test_parse_toml_table() {
        let config = WriterConfig::parse_toml(
            r#"
[writer]
dir = "/var/log/app"
extension = "txt"
rotate_after_secs = 0
"#,
        )
        .unwrap();

        assert_eq!(config.extension, "txt");
        assert_eq!(config.rotate_after(), Duration::ZERO);
    }

    #[test]
    fn test_parse_json() {
        let config =
            WriterConfig::parse_json(r#"{"dir": "/logs", "sync_threshold": 4096}"#).unwrap();
        assert_eq!(config.sync_threshold, 4096);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_parse_json_missing_dir() {
        let result = WriterConfig::parse_json(r#"{"extension": "log"}"#);
        assert!(matches!(result, Err(RotalogError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_separator_in_extension() {
        let mut config = WriterConfig::new("/logs");
        config.extension = "a/b".to_string();
        assert!(matches!(
            config.validate(),
            Err(RotalogError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("writer.yaml");
        fs::write(&path, "dir: /logs").unwrap();

        let result = WriterConfig::from_file(&path);
        assert!(matches!(result, Err(RotalogError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_expands_env() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("writer.toml");
        std::env::set_var("ROTALOG_TEST_LOG_ROOT", "/srv/logs");
        fs::write(&path, "dir = \"${ROTALOG_TEST_LOG_ROOT}/app\"\n").unwrap();

        let config = WriterConfig::from_file(&path).unwrap();
        assert_eq!(config.dir, PathBuf::from("/srv/logs/app"));
    }

    #[test]
    fn test_expand_env_matches_whole_names() {
        std::env::set_var("ROTALOG_TEST_ROOT", "/srv");
        std::env::remove_var("ROTALOG_TEST_ROOTDIR");

        assert_eq!(expand_env_in_string("$ROTALOG_TEST_ROOT/app"), "/srv/app");
        assert_eq!(expand_env_in_string("${ROTALOG_TEST_ROOT}dir"), "/srvdir");
        assert_eq!(
            expand_env_in_string("$ROTALOG_TEST_ROOTDIR/app"),
            "$ROTALOG_TEST_ROOTDIR/app"
        );
        assert_eq!(expand_env_in_string("cost: $5 ${unclosed"), "cost: $5 ${unclosed");
    }

    #[test]
    fn test_into_options() {
        let mut config = WriterConfig::new("/logs");
        config.rotate_after_secs = 60;
        config.max_file_size = 0;

        let options = config.into_options();
        assert_eq!(options.rotate_after, Duration::from_secs(60));
        assert_eq!(options.max_file_size, 0);
    }
}
