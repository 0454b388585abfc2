//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use arbor_restructure::ReconcileSettings;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Keep branches on disk. Off means the tree lives for this session only
    pub persistence_enabled: bool,
    /// Period of the background reconcile sweep
    pub reconcile_interval_ms: u64,
    /// Quiet time after a tab closes before reconciling
    pub reconcile_debounce_ms: u64,
    /// Delay of the first sweep after start
    pub startup_reconcile_delay_ms: u64,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("arbor.db"),
            persistence_enabled: true,
            reconcile_interval_ms: 30_000,
            reconcile_debounce_ms: 500,
            startup_reconcile_delay_ms: 2_000,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Arbor"))
            .unwrap_or_else(|| PathBuf::from(".arbor"))
    }

    /// Session-only configuration that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            persistence_enabled: false,
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval_ms == 0 {
            return Err(CoreError::Config(
                "reconcile_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.persistence_enabled && self.database_path.as_os_str().is_empty() {
            return Err(CoreError::Config("database_path is empty".to_string()));
        }
        Ok(())
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            interval: Duration::from_millis(self.reconcile_interval_ms),
            debounce: Duration::from_millis(self.reconcile_debounce_ms),
            startup_delay: Duration::from_millis(self.startup_reconcile_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
