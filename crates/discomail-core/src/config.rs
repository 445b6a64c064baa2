//! Store configuration.
//!
//! Loaded from `config.json` in the platform config directory, with the
//! `DISCOMAIL_OFFLINE` environment variable able to force the initial
//! connectivity status.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::status::ConnectivityStatus;

/// Environment variable forcing the initial status.
pub const OFFLINE_ENV: &str = "DISCOMAIL_OFFLINE";

/// What happens to a diary entry whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayFailurePolicy {
    /// Log the failure and remove the entry.
    #[default]
    Drop,
    /// Keep the entry, with its attempt count and last error, for manual
    /// inspection. It is retried on the next replay.
    Retain,
}

/// Settings shared by every store opened by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoConfig {
    /// Directory holding one database per store.
    pub data_dir: PathBuf,
    /// Start in offline mode.
    pub start_offline: bool,
    /// Fate of entries that fail to replay.
    pub replay_failures: ReplayFailurePolicy,
    /// Download message bodies of open folders before going offline.
    pub prepare_on_offline: bool,
    /// Capacity of the store event channel.
    pub event_capacity: usize,
}

impl Default for DiscoConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("discomail"),
            start_offline: false,
            replay_failures: ReplayFailurePolicy::Drop,
            prepare_on_offline: false,
            event_capacity: 256,
        }
    }
}

impl DiscoConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("discomail")
            .join("config.json")
    }

    /// Load the configuration from its default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()).await
    }

    /// Load the configuration from `path`, falling back to defaults when the
    /// file does not exist, then apply the environment override.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&contents)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_override(std::env::var(OFFLINE_ENV).ok().as_deref());
        Ok(config)
    }

    /// Save the configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Apply the value of [`OFFLINE_ENV`]. Unrecognised values are ignored.
    pub fn apply_env_override(&mut self, value: Option<&str>) {
        let Some(value) = value else { return };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => self.start_offline = true,
            "0" | "false" | "no" | "off" => self.start_offline = false,
            _ => {}
        }
    }

    /// Status a newly opened store starts in.
    #[must_use]
    pub const fn initial_status(&self) -> ConnectivityStatus {
        if self.start_offline {
            ConnectivityStatus::Offline
        } else {
            ConnectivityStatus::Online
        }
    }

    /// Database file for the store at `url`.
    #[must_use]
    pub fn database_path(&self, url: &str) -> PathBuf {
        self.data_dir.join(crate::storage::database_file_name(url))
    }
}
