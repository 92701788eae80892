use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `api.url` when set
pub const API_URL_ENV_VAR: &str = "PLATEMATES_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:5184";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  /// Backend base URL, without the `/api` prefix
  pub url: String,
  /// Whole-request timeout. Expiry surfaces as a network failure.
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: DEFAULT_API_URL.to_string(),
      timeout_secs: 30,
    }
  }
}

/// How long fetched data counts as fresh, per query kind
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  pub list_stale_secs: u64,
  pub search_stale_secs: u64,
  pub user_stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      list_stale_secs: 30,
      search_stale_secs: 300,
      user_stale_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn list_stale_time(&self) -> Duration {
    Duration::from_secs(self.list_stale_secs)
  }

  pub fn search_stale_time(&self) -> Duration {
    Duration::from_secs(self.search_stale_secs)
  }

  pub fn user_stale_time(&self) -> Duration {
    Duration::from_secs(self.user_stale_secs)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
  /// Shorter (trimmed) queries never hit the backend
  pub min_query_len: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self { min_query_len: 2 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./platemates.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/platemates/config.yaml
  ///
  /// Without any file the defaults apply. `PLATEMATES_API_URL` overrides the
  /// backend URL either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV_VAR) {
      if !url.trim().is_empty() {
        config.api.url = url.trim().to_string();
      }
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("platemates.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("platemates").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
