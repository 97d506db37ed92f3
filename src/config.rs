use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "eyepdf";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable that overrides the settings file location.
pub const CONFIG_ENV_VAR: &str = "EYEPDF_CONFIG";

const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "eyepdf=info,eyepdf_lib=info"
}

/// Get the application config directory (`<os config dir>/eyepdf/`).
/// Falls back to the working directory when the platform has none.
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Settings file path, honouring `EYEPDF_CONFIG`.
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => app_config_dir().join(CONFIG_FILE_NAME),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted settings. A flat key/value record; directory values are
/// stored as strings where the empty string means "not set".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub archive_dir: String,
    pub auto_start: bool,
    /// Output documents older than this many whole days are deleted.
    /// No sweep runs when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    pub sweep_interval_secs: u64,
    pub poll_interval_ms: u64,
    /// Upper bound for decoding, writing and archiving one pair.
    pub operation_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: String::new(),
            output_dir: String::new(),
            archive_dir: String::new(),
            auto_start: true,
            retention_days: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

fn non_empty_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

impl AppConfig {
    pub fn input_dir(&self) -> Option<PathBuf> {
        non_empty_dir(&self.input_dir)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        non_empty_dir(&self.output_dir)
    }

    pub fn archive_dir(&self) -> Option<PathBuf> {
        non_empty_dir(&self.archive_dir)
    }

    /// Watching starts on launch only when asked to and both the input and
    /// output folders are known. The archive folder is optional.
    pub fn should_auto_start(&self) -> bool {
        self.auto_start && self.input_dir().is_some() && self.output_dir().is_some()
    }

    /// Record the directories chosen for a watch or backfill run.
    pub fn set_dirs(&mut self, input: &Path, output: &Path, archive: Option<&Path>) {
        self.input_dir = input.to_string_lossy().into_owned();
        self.output_dir = output.to_string_lossy().into_owned();
        self.archive_dir = archive
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.max(1))
    }
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppConfig::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write settings to `path` as pretty JSON, creating the parent directory.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(io_err)
}
