//! Cache manager configuration.
//!
//! The configuration names the current generation, the assets to pre-cache
//! and the URL markers that must never be intercepted. It is stored as JSON
//! at `~/.config/assetcache/config.json` unless a path is given explicitly.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interceptor::FetchStrategy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "assetcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default timeout handed to the HTTP client.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Versioned name of the generation this configuration installs.
    pub generation: String,
    /// Origin that relative asset URLs resolve against.
    pub origin: String,
    /// Assets that must all be cached for install to succeed.
    pub required_assets: Vec<String>,
    /// Assets cached opportunistically.
    pub best_effort_assets: Vec<String>,
    /// URL substrings that bypass interception entirely.
    pub exclusion_markers: Vec<String>,
    pub strategy: FetchStrategy,
    /// Activate as soon as install completes, without waiting for consumers
    /// of the previous generation to close.
    pub skip_waiting: bool,
    pub request_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: "bitmerchant-v1".to_string(),
            origin: "http://localhost:8080".to_string(),
            required_assets: vec![
                "/".to_string(),
                "/static/pwa/manifest.json".to_string(),
                "/static/css/main.css".to_string(),
                "/static/js/datastar.js".to_string(),
            ],
            best_effort_assets: Vec::new(),
            exclusion_markers: vec![
                "/api/".to_string(),
                "/stream".to_string(),
                "/payment/".to_string(),
            ],
            strategy: FetchStrategy::default(),
            skip_waiting: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl CacheConfig {
    /// Load from `path`, or from the default location. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.generation.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid("generation name is empty".to_string()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigError::Invalid(format!(
                "generation name {:?} must not contain path separators",
                self.generation
            )));
        }
        if self.required_assets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one required asset is needed".to_string(),
            ));
        }
        self.origin_url()?;
        self.required_urls()?;
        self.best_effort_urls()?;
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid(format!("origin {:?}: {}", self.origin, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "origin scheme {:?} is not http(s)",
                other
            ))),
        }
    }

    /// Resolve an asset entry against the origin. Absolute URLs pass through.
    pub fn resolve(&self, asset: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(asset)
            .map_err(|e| ConfigError::Invalid(format!("asset {:?}: {}", asset, e)))
    }

    pub fn required_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.required_assets.iter().map(|a| self.resolve(a)).collect()
    }

    pub fn best_effort_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.best_effort_assets.iter().map(|a| self.resolve(a)).collect()
    }
}
