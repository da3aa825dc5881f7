use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::StoreName;

/// File-level configuration, as read from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the layer serves (scheme, host and port)
  pub origin: Option<String>,
  pub versions: VersionTags,
  /// Critical resources cached at install, in order
  pub manifest: Vec<String>,
  pub routes: RouteRules,
  /// Optional bound on each network fetch
  pub fetch_timeout_secs: Option<u64>,
  /// Cache database location (defaults to the platform data directory)
  pub database: Option<PathBuf>,
  pub notification: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: None,
      versions: VersionTags::default(),
      manifest: default_manifest(),
      routes: RouteRules::default(),
      fetch_timeout_secs: None,
      database: None,
      notification: NotificationConfig::default(),
    }
  }
}

fn default_manifest() -> Vec<String> {
  ["/", "/manifest.json", "/human-cell", "/cell-placeholder.gif", "/images/logo.png"]
    .into_iter()
    .map(String::from)
    .collect()
}

/// One version tag per store role. Bumping a tag evicts that role's data on
/// the next activation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionTags {
  #[serde(rename = "static")]
  pub static_tag: String,
  pub dynamic: String,
}

impl Default for VersionTags {
  fn default() -> Self {
    Self {
      static_tag: "v2".to_string(),
      dynamic: "v2".to_string(),
    }
  }
}

/// Path prefixes used to classify requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteRules {
  #[serde(deserialize_with = "deserialize_prefixes")]
  pub static_prefixes: Vec<String>,
  #[serde(deserialize_with = "deserialize_prefixes")]
  pub api_prefixes: Vec<String>,
}

impl Default for RouteRules {
  fn default() -> Self {
    Self {
      static_prefixes: vec!["/static/".to_string()],
      api_prefixes: vec!["/api/".to_string()],
    }
  }
}

/// Prefixes always start and end with a slash so `/api/` never matches `/apiary`.
fn deserialize_prefixes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| normalize_prefix(&s)).collect())
}

fn normalize_prefix(prefix: &str) -> String {
  let trimmed = prefix.trim().trim_matches('/');
  if trimmed.is_empty() {
    "/".to_string()
  } else {
    format!("/{}/", trimmed)
  }
}

/// What push notifications look like.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "World of Cells".to_string(),
      icon: "/icons/epithelial-cell.png".to_string(),
    }
  }
}

/// Validated, immutable configuration for one layer instance.
///
/// Store names are derived from here rather than from globals, so several
/// instances can share a backend without colliding.
#[derive(Debug, Clone)]
pub struct LayerConfig {
  pub origin: Url,
  pub versions: VersionTags,
  pub manifest: Vec<String>,
  pub routes: RouteRules,
  pub notification: NotificationConfig,
}

impl LayerConfig {
  /// Defaults for everything but the origin.
  pub fn new(origin: Url) -> Self {
    let defaults = Config::default();
    Self {
      origin,
      versions: defaults.versions,
      manifest: defaults.manifest,
      routes: defaults.routes,
      notification: defaults.notification,
    }
  }

  pub fn with_versions(self, static_tag: &str, dynamic: &str) -> Self {
    Self {
      versions: VersionTags {
        static_tag: static_tag.to_string(),
        dynamic: dynamic.to_string(),
      },
      ..self
    }
  }

  pub fn with_manifest<I, P>(self, manifest: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<String>,
  {
    Self {
      manifest: manifest.into_iter().map(Into::into).collect(),
      ..self
    }
  }

  pub fn static_store(&self) -> StoreName {
    StoreName::static_store(&self.versions.static_tag)
  }

  pub fn dynamic_store(&self) -> StoreName {
    StoreName::dynamic_store(&self.versions.dynamic)
  }

  /// Resolve a path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
    self.origin.join(path)
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cellar.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cellar/config.yaml
  ///
  /// Without any file the defaults apply.
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

    if let Ok(origin) = std::env::var("CELLAR_ORIGIN") {
      config.origin = Some(origin);
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cellar.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cellar").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn fetch_timeout(&self) -> Option<Duration> {
    self.fetch_timeout_secs.map(Duration::from_secs)
  }

  /// Validate and build the immutable layer configuration.
  pub fn layer_config(&self) -> Result<LayerConfig> {
    let origin = self
      .origin
      .as_deref()
      .ok_or_else(|| eyre!("No origin configured. Set `origin` in cellar.yaml, CELLAR_ORIGIN, or pass --origin."))?;
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https, got '{}'", origin.scheme()));
    }

    if self.versions.static_tag.trim().is_empty() || self.versions.dynamic.trim().is_empty() {
      return Err(eyre!("Version tags must not be empty"));
    }

    if self.manifest.is_empty() {
      return Err(eyre!("The install manifest must list at least one resource"));
    }
    if let Some(bad) = self.manifest.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Manifest entries must be absolute paths, got '{}'", bad));
    }

    Ok(LayerConfig {
      origin,
      versions: self.versions.clone(),
      manifest: self.manifest.clone(),
      routes: self.routes.clone(),
      notification: self.notification.clone(),
    })
  }
}
