use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prefetch::PrefetchConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub prefetch: PrefetchSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the Quo REST backend.
  #[serde(default = "default_backend_url")]
  pub url: String,
}

fn default_backend_url() -> String {
  "http://localhost:8000".to_string()
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: default_backend_url(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Override for the analysis-cache TTL (default 5 minutes).
  pub ttl_minutes: Option<i64>,
}

/// Prefetch tuning as it appears in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchSettings {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_prefetch_delay_ms")]
  pub delay_ms: u64,
  #[serde(default = "default_prefetch_stagger_ms")]
  pub stagger_ms: u64,
  /// Also warm the other reporting periods for the current account.
  #[serde(default)]
  pub sibling_periods: bool,
}

fn default_true() -> bool {
  true
}

fn default_prefetch_delay_ms() -> u64 {
  2000
}

fn default_prefetch_stagger_ms() -> u64 {
  500
}

impl Default for PrefetchSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      delay_ms: default_prefetch_delay_ms(),
      stagger_ms: default_prefetch_stagger_ms(),
      sibling_periods: false,
    }
  }
}

impl From<&PrefetchSettings> for PrefetchConfig {
  fn from(settings: &PrefetchSettings) -> Self {
    PrefetchConfig {
      enabled: settings.enabled,
      base_delay: Duration::from_millis(settings.delay_ms),
      stagger: Duration::from_millis(settings.stagger_ms),
      sibling_periods: settings.sibling_periods,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./quo.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/quo/config.yaml
  ///
  /// Every setting has a default, so a missing file is not an error.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Config::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("quo.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("quo").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// TTL for the analysis cache.
  pub fn cache_ttl(&self) -> chrono::Duration {
    match self.cache.ttl_minutes {
      Some(minutes) => chrono::Duration::minutes(minutes),
      None => chrono::Duration::minutes(5),
    }
  }
}
