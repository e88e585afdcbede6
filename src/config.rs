use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::ensure_parent_dir;
use crate::storage::sqlite_store::{DEFAULT_CHANGE_BUFFER, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_DATABASE_PATH: &str = "data/chat.db";
/// Overrides `database_path` when set (also read from `.env`).
pub const DATABASE_PATH_ENV: &str = "PARCELPRO_DB_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Newest-N cap for live conversation snapshots; unbounded when absent.
    #[serde(default)]
    pub snapshot_limit: Option<usize>,
    /// Capacity of the store change feed before slow listeners lag.
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
    /// How often to look for messages written by other processes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_change_buffer() -> usize {
    DEFAULT_CHANGE_BUFFER
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            snapshot_limit: None,
            change_buffer: default_change_buffer(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.trim().is_empty() {
                log::info!("Using database path {path} from {DATABASE_PATH_ENV}");
                self.database_path = path;
            }
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Read the chat config at `path`. Never fails: anything unusable is logged
/// and replaced by [`AppConfig::default`].
pub fn load_config(path: &str) -> AppConfig {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::info!("No chat config at {path}; using built-in defaults");
            return AppConfig::default();
        }
        Err(err) => {
            log::warn!("Chat config {path} is unreadable ({err}); using built-in defaults");
            return AppConfig::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|err| {
        log::warn!("Chat config {path} is not valid ({err}); using built-in defaults");
        AppConfig::default()
    })
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
