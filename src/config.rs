//! Worker configuration.
//!
//! One explicit value passed into the lifecycle controller at construction.
//! Defaults mirror the deployed site; a YAML file can override them.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Version token bound to the deployed asset set. Bumping it at deploy time
  /// is what invalidates every previously cached partition.
  pub version: String,
  /// Origin the page is served from; relative manifest entries and API
  /// endpoints resolve against it.
  pub origin: String,
  /// Critical files primed into the static partition at install.
  pub static_manifest: Vec<String>,
  /// Third-party hosts eligible for stale-while-revalidate.
  pub cacheable_hosts: Vec<String>,
  /// Override for the cache/queue database location.
  pub database_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      version: "v1.0.0".to_string(),
      origin: "https://rolan-icecream.com".to_string(),
      static_manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/script.js".to_string(),
        "/manifest.json".to_string(),
        "https://fonts.googleapis.com/css2?family=Cairo:wght@400;600;700&display=swap".to_string(),
        "https://fonts.gstatic.com/s/cairo/v28/SLXgc1nY6HkvalIhTp2mxdt0UX8gO3BP.woff2".to_string(),
      ],
      cacheable_hosts: vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
      ],
      database_path: None,
    }
  }
}

impl WorkerConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (missing file is an error)
  /// 2. ./rolan-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rolan-worker/config.yaml
  ///
  /// With no file found anywhere, the built-in defaults apply.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("rolan-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rolan-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: WorkerConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The site's root page URL.
  pub fn root_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Resolve an API path (e.g. `/api/orders`) against the origin.
  pub fn api_url(&self, path: &str) -> Result<Url> {
    self
      .root_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  /// The static manifest resolved to absolute URLs.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let root = self.root_url()?;
    self
      .static_manifest
      .iter()
      .map(|entry| {
        if entry.starts_with("http://") || entry.starts_with("https://") {
          Url::parse(entry).map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))
        } else {
          root
            .join(entry)
            .map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))
        }
      })
      .collect()
  }

  /// Resolve the cache/queue database path (override or platform data dir).
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("rolan-worker").join("cache.db"))
  }
}
