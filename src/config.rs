use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `api.base_url`.
pub const API_URL_ENV: &str = "COURIER_API_URL";
/// Login password when none is given on the command line.
pub const PASSWORD_ENV: &str = "COURIER_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub connectivity: ConnectivityConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  /// Root of the REST API, endpoints are appended verbatim
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8000/api".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  /// Cached responses older than this are not served offline
  pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
  /// Drop a queued mutation after this many failed replays
  pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub probe_interval_secs: u64,
  pub probe_timeout_ms: u64,
  /// `host:port` to probe (defaults to the API host)
  pub probe_address: Option<String>,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: 5,
      probe_timeout_ms: 1500,
      probe_address: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courier.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courier/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. `COURIER_API_URL`
  /// overrides the configured base URL.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("courier.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courier").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  fn with_env_overrides(mut self, api_url: Option<String>) -> Self {
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
    self
  }

  /// Get the login password from the environment.
  pub fn get_password() -> Result<String> {
    std::env::var(PASSWORD_ENV)
      .map_err(|_| eyre!("Password not given. Pass --password or set {}.", PASSWORD_ENV))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.probe_interval_secs.max(1))
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_millis(self.connectivity.probe_timeout_ms)
  }

  pub fn cache_ttl(&self) -> Option<chrono::Duration> {
    self
      .cache
      .ttl_secs
      .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?))
  }
}
