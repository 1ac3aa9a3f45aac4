//! Configuration for the sync client.
//!
//! Persisted as TOML (typically at `~/.config/drift/config.toml` on Unix
//! systems). All fields are optional so a partial file merges with
//! defaults; unknown keys are ignored for forward compatibility.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delta::types::ConflictStrategy;
use crate::error::{DriftError, Result};

/// Days a locally-present record may be missing from the remote set before
/// it is treated as remotely deleted.
const DEFAULT_DELETION_WINDOW_DAYS: u64 = 7;

/// User-configurable sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sync server URL (e.g., "https://sync.example.com")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// Session token for authenticated sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Account id the local data belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Human-readable device name shown to other devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// How conflicting record edits are resolved
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Tombstone window for deletion detection, in days
    #[serde(default = "default_deletion_window_days")]
    pub deletion_window_days: u64,
}

fn default_deletion_window_days() -> u64 {
    DEFAULT_DELETION_WINDOW_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            session_token: None,
            user_id: None,
            device_name: None,
            conflict_strategy: ConflictStrategy::default(),
            deletion_window_days: DEFAULT_DELETION_WINDOW_DAYS,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or(DriftError::NoConfigDir)?;
        Ok(dir.join("drift").join("config.toml"))
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load config from a path, falling back to defaults if missing or
    /// unreadable.
    pub fn load_from_or_default(path: &Path) -> Self {
        Self::load_from(path).unwrap_or_default()
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// The deletion window in milliseconds.
    pub fn deletion_window_ms(&self) -> i64 {
        (self.deletion_window_days as i64) * 24 * 60 * 60 * 1000
    }
}
