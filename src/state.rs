//! Shared application state and config I/O.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::{Config, ScheduleEntry};
use crate::util::atomic_write_str;

/// State shared between the scheduler and the run loop.
pub struct AppState {
    pub config: Mutex<Option<Config>>,
    last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
}

impl AppState {
    /// Load state from disk. A missing config is allowed — the daemon
    /// refuses to start without one, but `status` still works.
    pub fn new() -> Self {
        let config = match load_config() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("No usable config at {}: {}", config_path().display(), e);
                None
            }
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Option<Config>) -> Self {
        Self {
            config: Mutex::new(config),
            last_scheduled_run: Mutex::new(None),
        }
    }

    /// Clone of the current config, if any.
    pub fn config(&self) -> Option<Config> {
        self.config.lock().map(|g| g.clone()).unwrap_or(None)
    }

    /// The processing schedule from config.
    pub fn schedule(&self) -> Option<ScheduleEntry> {
        self.config().map(|c| c.schedule)
    }

    /// When the last scheduled batch ran.
    pub fn get_last_scheduled_run(&self) -> Option<DateTime<Utc>> {
        self.last_scheduled_run
            .lock()
            .map(|g| *g)
            .unwrap_or(None)
    }

    /// Record when a scheduled batch ran.
    pub fn set_last_scheduled_run(&self, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_scheduled_run.lock() {
            *guard = Some(time);
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Config I/O
// =============================================================================

/// Path to the config file (~/.slotwise/config.json).
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".slotwise")
        .join("config.json")
}

/// Load config from disk. `Ok(None)` when no file exists yet.
pub fn load_config() -> Result<Option<Config>, std::io::Error> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(config))
}

/// Persist config atomically.
pub fn save_config(config: &Config) -> Result<(), std::io::Error> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    atomic_write_str(&path, &content)
}
