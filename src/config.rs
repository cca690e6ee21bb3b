//! Configuration management for Scribe.
//!
//! Loads and saves application configuration to a JSON file in a
//! caller-supplied directory. A missing file yields defaults (and is written
//! out); a corrupt file also degrades to defaults rather than failing
//! startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ScribeResult;

fn default_server_url() -> String {
    "http://localhost:4100".to_string()
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    2
}

/// Auto-save timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveSettings {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Cloud backup provider settings. Only consulted when `enabled` is set and
/// an account is signed in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Provider identifier ("s3" is the only shipped provider)
    #[serde(default)]
    pub provider: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Key prefix namespacing all snapshots
    pub prefix: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Base URL of the notes backend
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Signed-in account id (None when signed out)
    #[serde(default)]
    pub account: Option<String>,
    /// Path to the local store database file
    #[serde(default)]
    pub local_store_file: String,
    #[serde(default)]
    pub autosave: AutosaveSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            account: None,
            local_store_file: String::new(),
            autosave: AutosaveSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Load (or initialize) configuration under the given directory.
    pub fn new(config_dir: PathBuf) -> ScribeResult<Self> {
        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let defaults = || {
            let mut data = ConfigData::default();
            data.local_store_file = config_dir.join("scribe.db").to_string_lossy().to_string();
            data
        };

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("Corrupt config file, using defaults: {}", e);
                    defaults()
                }),
                Err(_) => defaults(),
            }
        } else {
            defaults()
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Persist the defaults on first run
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> ScribeResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data(&self) -> &ConfigData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ConfigData {
        &mut self.data
    }

    pub fn server_url(&self) -> &str {
        &self.data.server_url
    }

    pub fn account(&self) -> Option<&str> {
        self.data.account.as_deref()
    }

    /// Record sign-in / sign-out.
    pub fn set_account(&mut self, account: Option<String>) -> ScribeResult<()> {
        self.data.account = account;
        self.save()
    }

    pub fn local_store_file(&self) -> &str {
        &self.data.local_store_file
    }
}
