use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::{self, AppConfig, ConfigError};
use crate::retention::SweeperHandle;
use crate::watcher::WatchSession;

/// Application state shared by every command.
/// Holds the settings, the live watch session and the retention sweeper.
pub struct AppState {
    pub config_path: PathBuf,
    config: Mutex<AppConfig>,
    /// Live watch session. Uses tokio Mutex because stopping awaits.
    pub watch_session: tokio::sync::Mutex<Option<WatchSession>>,
    pub sweeper: tokio::sync::Mutex<Option<SweeperHandle>>,
}

impl AppState {
    pub fn new(config_path: PathBuf, config: AppConfig) -> Self {
        Self {
            config_path,
            config: Mutex::new(config),
            watch_session: tokio::sync::Mutex::new(None),
            sweeper: tokio::sync::Mutex::new(None),
        }
    }

    /// Load settings from the default location (or `EYEPDF_CONFIG`).
    pub fn load() -> Result<Self, ConfigError> {
        let path = config::config_path();
        let settings = config::load_config(&path)?;
        tracing::debug!(path = %path.display(), "Settings loaded");
        Ok(Self::new(path, settings))
    }

    /// Current settings (a copy).
    pub fn config(&self) -> AppConfig {
        match self.config.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Modify the settings and write them back to disk.
    pub fn update_config(&self, f: impl FnOnce(&mut AppConfig)) -> Result<(), ConfigError> {
        let snapshot = {
            let mut guard = match self.config.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut guard);
            guard.clone()
        };
        config::save_config(&self.config_path, &snapshot)
    }
}
