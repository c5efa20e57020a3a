//! User and platform configuration management
//!
//! Configuration is stored in TOML format at `~/.socketpm/config.toml`.
//! Every field has a default, so a missing or partial file is fine.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::load()?;
//! println!("Max socket size: {}", config.limits.max_size);
//!
//! config.worker.max_attempts = 5;
//! config.save()?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Reserved path of the manifest inside a bundle.
pub const MANIFEST_NAME: &str = "socket.yml";

/// Configuration file (`~/.socketpm/config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Import and install limits
    #[serde(default)]
    pub limits: Limits,

    /// Task queue settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Remote bundle download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Default per-tenant quotas
    #[serde(default)]
    pub quotas: QuotaConfig,

    /// On-disk store location
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Path of the manifest inside a bundle
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Absolute size quota for all files of one socket (bytes)
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Maximum size of a downloaded bundle (bytes)
    #[serde(default = "default_max_zip_file_size")]
    pub max_zip_file_size: u64,

    /// Maximum number of entries in a bundle
    #[serde(default = "default_max_zip_files")]
    pub max_zip_files: usize,

    /// Maximum endpoints installed in one task
    #[serde(default = "default_max_endpoints")]
    pub max_endpoints: usize,

    /// Maximum non-endpoint dependencies installed in one task
    #[serde(default = "default_max_dependencies")]
    pub max_dependencies: usize,

    /// Maximum top-level keys in a manifest
    #[serde(default = "default_max_manifest_keys")]
    pub max_manifest_keys: usize,

    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,

    /// Endpoint cache ceiling (seconds)
    #[serde(default = "default_max_cache")]
    pub max_cache: f64,

    /// Script timeout ceiling (seconds)
    #[serde(default = "default_max_timeout")]
    pub max_timeout: f64,

    #[serde(default = "default_max_async")]
    pub max_async: i64,

    #[serde(default = "default_max_mcpu")]
    pub max_mcpu: i64,

    /// Version used when a manifest omits one
    #[serde(default = "default_version")]
    pub default_version: String,

    /// Platform hosting domain; custom domains may not live under it
    #[serde(default = "default_hosting_domain")]
    pub hosting_domain: String,
}

fn default_manifest_name() -> String {
    MANIFEST_NAME.to_string()
}

fn default_max_size() -> u64 {
    25 * 1024 * 1024
}

fn default_max_zip_file_size() -> u64 {
    15 * 1024 * 1024
}

fn default_max_zip_files() -> usize {
    30
}

fn default_max_endpoints() -> usize {
    30
}

fn default_max_dependencies() -> usize {
    100
}

fn default_max_manifest_keys() -> usize {
    16
}

fn default_max_path_length() -> usize {
    260
}

fn default_max_cache() -> f64 {
    30.0 * 60.0
}

fn default_max_timeout() -> f64 {
    5.0 * 60.0
}

fn default_max_async() -> i64 {
    100
}

fn default_max_mcpu() -> i64 {
    1000
}

fn default_version() -> String {
    "0.1".to_string()
}

fn default_hosting_domain() -> String {
    ".socketpm.site".to_string()
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            manifest_name: default_manifest_name(),
            max_size: default_max_size(),
            max_zip_file_size: default_max_zip_file_size(),
            max_zip_files: default_max_zip_files(),
            max_endpoints: default_max_endpoints(),
            max_dependencies: default_max_dependencies(),
            max_manifest_keys: default_max_manifest_keys(),
            max_path_length: default_max_path_length(),
            max_cache: default_max_cache(),
            max_timeout: default_max_timeout(),
            max_async: default_max_async(),
            max_mcpu: default_max_mcpu(),
            default_version: default_version(),
            hosting_domain: default_hosting_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Attempts per task before an infrastructure failure becomes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between retries (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
}

fn default_download_timeout() -> u64 {
    15
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota")]
    pub classes: usize,

    #[serde(default = "default_quota")]
    pub schedules: usize,

    #[serde(default = "default_quota")]
    pub sockets: usize,

    /// Tenants allowed to set async/mcpu budgets
    #[serde(default)]
    pub trusted_tenants: Vec<String>,
}

fn default_quota() -> usize {
    100
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            classes: default_quota(),
            schedules: default_quota(),
            sockets: default_quota(),
            trusted_tenants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding tenant state and stored files (`~` is expanded)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "~/.socketpm/data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Resolved data directory
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// Uses SOCKETPM_CONFIG_DIR if set, otherwise ~/.socketpm/config.toml
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(config_dir) = std::env::var("SOCKETPM_CONFIG_DIR") {
            return Ok(PathBuf::from(config_dir).join("config.toml"));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("Could not find home directory".to_string()))?;

        Ok(home.join(".socketpm").join("config.toml"))
    }

    /// Load config from file, or use defaults if it doesn't exist
    ///
    /// Environment variable overrides:
    /// - `SOCKETPM_DATA_DIR`: Overrides `storage.data_dir`
    /// - `SOCKETPM_CONFIG_DIR`: Overrides the config directory location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;

        let mut config = if !path.exists() {
            Self::default()
        } else {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        };

        if let Ok(data_dir) = std::env::var("SOCKETPM_DATA_DIR") {
            if !data_dir.is_empty() {
                config.storage.data_dir = data_dir;
            }
        }

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}
