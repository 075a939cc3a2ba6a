use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::danbooru::{ClientConfig, Credentials};
use crate::engine::dispatcher::{DEFAULT_CONCURRENCY, clamp_concurrency};
use crate::engine::fetcher::FetcherConfig;
use crate::engine::security::SecretBox;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const MAX_PREVIEW_LIMIT: u32 = 30;
/// Largest `limit` the board accepts per page.
pub const MAX_PAGE_SIZE: u32 = 200;

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Loose check used by the settings menu before accepting an email address.
pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub download_directory: String,
    pub log_directory: String,
    pub key_file: String,
    pub history_file: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            download_directory: "./downloads".to_string(),
            log_directory: "./logs".to_string(),
            key_file: "./.secret.key".to_string(),
            history_file: "./search_history.json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Api {
    pub base_url: String,
    pub username: String,
    /// Sealed on disk, plain in memory.
    pub api_key: String,
    pub nickname: String,
    pub email: String,
    pub page_size: u32,
    pub preview_limit: u32,
    pub safe_search: bool,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "https://danbooru.donmai.us".to_string(),
            username: String::new(),
            api_key: String::new(),
            nickname: String::new(),
            email: "unknown@example.com".to_string(),
            page_size: 100,
            preview_limit: 20,
            safe_search: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Pools {
    pub max_download_concurrency: usize,
}

impl Default for Pools {
    fn default() -> Self {
        Self {
            max_download_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Rate {
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Rate {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            log_to_file: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Ui {
    pub skip_download_confirmation: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub paths: Paths,
    pub api: Api,
    pub pools: Pools,
    pub rate: Rate,
    pub logging: Logging,
    pub ui: Ui,
}

impl AppConfig {
    /// Apply the allowed ranges to every bounded setting.
    pub fn normalized(mut self) -> Self {
        self.api.preview_limit = self.api.preview_limit.clamp(1, MAX_PREVIEW_LIMIT);
        self.api.page_size = self.api.page_size.clamp(1, MAX_PAGE_SIZE);
        self.pools.max_download_concurrency = clamp_concurrency(self.pools.max_download_concurrency);
        self.rate.max_attempts = self.rate.max_attempts.max(1);
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.api.username.trim().to_string(),
            api_key: self.api.api_key.trim().to_string(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            credentials: self.credentials(),
            nickname: Some(self.api.nickname.clone()).filter(|n| !n.trim().is_empty()),
            email: self.api.email.clone(),
            timeout: Duration::from_secs(self.rate.request_timeout_secs.max(1)),
            max_attempts: self.rate.max_attempts,
            retry_backoff: Duration::from_millis(self.rate.retry_backoff_ms),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            max_attempts: self.rate.max_attempts,
            retry_backoff: Duration::from_millis(self.rate.retry_backoff_ms),
            idle_timeout: Duration::from_secs(self.rate.request_timeout_secs.max(1)),
        }
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
    secret: Option<SecretBox>,
}

impl ConfigManager {
    // Create a new ConfigManager instance, writing defaults when no file exists
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;

        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
            secret: None,
        };

        if !manager.config_path().exists() {
            manager.write_file(&manager.get_app_config()?)?;
            info!("Created default {}", CONFIG_FILE_NAME);
        }

        Ok(manager)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(config.normalized()),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_FILE_NAME, e);
                info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(toml_string) => {
                        if let Err(write_err) = fs::write(&config_path, toml_string) {
                            error!("Failed to write new config file: {}", write_err);
                        }
                    }
                    Err(ser_err) => error!("Failed to serialize default config: {}", ser_err),
                }

                Ok(default_config)
            }
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Use `secret` for the stored API key. A key still stored in plain text
    /// is sealed on disk right away.
    pub fn attach_secret(&mut self, secret: SecretBox) -> ConfigResult<()> {
        let stored = self.get_app_config()?.api.api_key;
        let was_plain = !stored.is_empty() && secret.open(&stored).is_err();
        let opened = secret.open_or_plain(&stored);

        self.secret = Some(secret);

        let mut config = self.get_app_config()?;
        config.api.api_key = opened;
        if was_plain {
            info!("Sealing API key stored in plain text");
            self.save_app_config(&config)?;
        } else {
            self.store_in_memory(config)?;
        }

        Ok(())
    }

    // Get app config
    pub fn get_app_config(&self) -> ConfigResult<AppConfig> {
        self.app_config
            .read()
            .map_err(|e| ConfigError::LockError(e.to_string()))
            .map(|config| config.clone())
    }

    // Save app config to file
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let config = config.clone().normalized();
        self.write_file(&config)?;
        self.store_in_memory(config)
    }

    /// Apply `change` to the current config and save it.
    pub fn update<F>(&self, change: F) -> ConfigResult<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.get_app_config()?;
        change(&mut config);
        self.save_app_config(&config)?;
        self.get_app_config()
    }

    // Check if board credentials are configured
    pub fn has_valid_credentials(&self) -> bool {
        self.get_app_config()
            .map(|config| config.credentials().is_complete())
            .unwrap_or(false)
    }

    fn store_in_memory(&self, config: AppConfig) -> ConfigResult<()> {
        let mut app_config = self
            .app_config
            .write()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;
        *app_config = config;
        Ok(())
    }

    fn write_file(&self, config: &AppConfig) -> ConfigResult<()> {
        let mut on_disk = config.clone();
        if let Some(secret) = &self.secret {
            on_disk.api.api_key = secret
                .seal(&config.api.api_key)
                .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(&on_disk).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(self.config_path(), toml_string)?;
        Ok(())
    }
}
