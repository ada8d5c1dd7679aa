use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use crate::error::{CharterError, Result};

/// Global configuration instance
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

const APP_DIR: &str = "charter";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub threads: ThreadsConfig,
}

/// Archive backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Endpoint serving the email collection
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Basic auth credentials, sent only when both are set
    pub username: Option<String>,
    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file; defaults to the platform data dir
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// Thread roots per page in a mailing list listing
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on messages fetched for one thread
    #[serde(default = "default_thread_page_size")]
    pub thread_page_size: u32,
}

fn default_base_url() -> String {
    "http://charter.ws:8080/charter/emails".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_thread_page_size() -> u32 {
    1000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            thread_page_size: default_thread_page_size(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Configured cache location, or the platform default
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.cache.db_path {
            Some(path) => Ok(path.clone()),
            None => default_db_path(),
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_DIR).join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join(APP_DIR).join("config.toml"));
        paths.push(home_dir.join(".charterrc"));
    }

    paths
}

/// Cache database under the platform data dir
pub fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .ok_or_else(|| CharterError::Config("Could not determine data directory".to_string()))?
        .join(APP_DIR);

    fs::create_dir_all(&dir)?;

    Ok(dir.join("cache.db"))
}

/// Initialize configuration from default paths
pub fn init_config() -> Result<()> {
    match default_config_paths().into_iter().find(|path| path.exists()) {
        Some(path) => init_config_from_path(&path),
        None => {
            info!("No config file found, using defaults");
            set_config(AppConfig::default())
        }
    }
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<()> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| CharterError::Config(format!("Failed to read config: {}", e)))?;

    set_config(AppConfig::from_toml(&content)?)
}

fn set_config(config: AppConfig) -> Result<()> {
    let lock = CONFIG.get_or_init(|| RwLock::new(AppConfig::default()));
    let mut guard = lock
        .write()
        .map_err(|e| CharterError::Config(format!("Failed to lock config: {}", e)))?;
    *guard = config;
    Ok(())
}

/// Snapshot of the current configuration. Defaults when uninitialized.
pub fn get_config() -> AppConfig {
    CONFIG
        .get()
        .and_then(|lock| lock.read().ok().map(|guard| guard.clone()))
        .unwrap_or_default()
}
