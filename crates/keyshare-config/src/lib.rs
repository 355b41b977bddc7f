//! # keyshare-config
//!
//! Configuration management for keyshare.
//!
//! Loads configuration from:
//! 1. `~/.keyshare/config.toml` (global)
//! 2. `.keyshare/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

pub const ENV_ROOT: &str = "KEYSHARE_ROOT";
pub const ENV_FOLDER: &str = "KEYSHARE_FOLDER";
pub const ENV_DOWNLOAD_LIMIT: &str = "KEYSHARE_DOWNLOAD_LIMIT";
pub const ENV_LOCK_TIMEOUT_MS: &str = "KEYSHARE_LOCK_TIMEOUT_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    pub ledger: LedgerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.keyshare/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        // 2. Project config (.keyshare/config.toml) overrides global
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::load_from(&project_path)?;
            config.merge(project_config);
        }

        // 3. Environment
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file without layering.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.keyshare/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".keyshare/config.toml"))
    }

    /// Project config path, relative to the working directory.
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".keyshare/config.toml")
    }

    /// Merge a project config over this one. Only fields that differ from
    /// the defaults replace the current value.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.root != defaults.storage.root {
            self.storage.root = other.storage.root;
        }
        if other.storage.folder != defaults.storage.folder {
            self.storage.folder = other.storage.folder;
        }
        if other.quota.download_limit != defaults.quota.download_limit {
            self.quota.download_limit = other.quota.download_limit;
        }
        if other.ledger.lock_timeout_ms != defaults.ledger.lock_timeout_ms {
            self.ledger.lock_timeout_ms = other.ledger.lock_timeout_ms;
        }
        if other.ledger.lock_poll_ms != defaults.ledger.lock_poll_ms {
            self.ledger.lock_poll_ms = other.ledger.lock_poll_ms;
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable numbers are
    /// ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(folder) = lookup(ENV_FOLDER) {
            self.storage.folder = folder;
        }
        if let Some(limit) = lookup(ENV_DOWNLOAD_LIMIT).and_then(|s| s.parse().ok()) {
            self.quota.download_limit = limit;
        }
        if let Some(ms) = lookup(ENV_LOCK_TIMEOUT_MS).and_then(|s| s.parse().ok()) {
            self.ledger.lock_timeout_ms = ms;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for blobs, ledgers and lock files. A leading `~/` is
    /// expanded against the home directory.
    pub root: PathBuf,
    /// Name of the storage folder under `root`
    pub folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.keyshare/store"),
            folder: "files".to_string(),
        }
    }
}

impl StorageConfig {
    /// Root directory with `~` expanded.
    pub fn root_dir(&self) -> PathBuf {
        path::expand_home(&self.root)
    }
}

/// Download quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Downloads granted to an origin the first time it is seen
    pub download_limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { download_limit: 10 }
    }
}

/// Ledger locking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for a ledger lock
    pub lock_timeout_ms: u64,
    /// Sleep between lock attempts
    pub lock_poll_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            lock_poll_ms: 5,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}
