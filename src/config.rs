use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calmesh_provider_google::GoogleConfig;
use serde::{Deserialize, Serialize};

pub const CLIENT_ID_ENV: &str = "CALMESH_GOOGLE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "CALMESH_GOOGLE_CLIENT_SECRET";

const DEFAULT_CONFIG: &str = r#"# calmesh configuration

# Where the store (accounts, mappings, sync log) is kept.
# Defaults to the platform data directory.
# data_dir = "~/.local/share/calmesh"

[sync]
interval_minutes = 15
# History fetched on a user's first sync, and on later syncs
initial_lookback_days = 365
lookback_days = 30
lookahead_days = 180
workers = 2
max_attempts = 3
retry_backoff_secs = 30

[google]
# Can also be set with CALMESH_GOOGLE_CLIENT_ID / CALMESH_GOOGLE_CLIENT_SECRET
client_id = ""
client_secret = ""
# token_url = "https://oauth2.googleapis.com/token"
# api_base = "https://www.googleapis.com/calendar/v3"

[caldav]
server_url = "https://caldav.icloud.com"
# Skip collections that only hold tasks or reminders
vevent_only = true
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<String>,
    pub sync: SyncSettings,
    pub google: GoogleConfig,
    pub caldav: CaldavSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_minutes: u64,
    pub initial_lookback_days: i64,
    pub lookback_days: i64,
    pub lookahead_days: i64,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_minutes: 15,
            initial_lookback_days: calmesh_core::constants::INITIAL_LOOKBACK_DAYS,
            lookback_days: calmesh_core::constants::DEFAULT_LOOKBACK_DAYS,
            lookahead_days: calmesh_core::constants::DEFAULT_LOOKAHEAD_DAYS,
            workers: 2,
            max_attempts: 3,
            retry_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaldavSettings {
    /// Used when connecting an account without an explicit server
    pub server_url: String,
    pub vevent_only: bool,
}

impl Default for CaldavSettings {
    fn default() -> Self {
        CaldavSettings {
            server_url: "https://caldav.icloud.com".to_string(),
            vevent_only: true,
        }
    }
}

impl Config {
    /// Get the config directory path (~/.config/calmesh)
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("calmesh"))
    }

    /// Get the config file path (~/.config/calmesh/config.toml)
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the config file (defaults if it doesn't exist), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Environment values win over the file. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(id) = non_empty(CLIENT_ID_ENV) {
            self.google.client_id = id;
        }
        if let Some(secret) = non_empty(CLIENT_SECRET_ENV) {
            self.google.client_secret = secret;
        }
    }

    /// Write the commented default config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
        }

        std::fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write config file at {}", path.display()))?;

        Ok(true)
    }

    /// Directory holding the store file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_path(dir)),
            None => Ok(dirs::data_dir()
                .context("Could not determine data directory")?
                .join("calmesh")),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("store.json"))
    }

    /// Per-user sync lock files.
    pub fn lock_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("locks"))
    }
}

/// Expand ~ in paths to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
