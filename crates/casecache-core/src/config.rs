//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! remote service base URL, endpoint paths used by synchronization, request
//! timeout and cache freshness settings.
//!
//! Configuration is stored at `~/.config/casecache/config.json`. The
//! `CASECACHE_BASE_URL` and `CASECACHE_DATA_DIR` environment variables
//! override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "casecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Remote service used when nothing is configured
const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Reference data (plan-of-life questions, lookups) changes rarely;
/// refresh it in the background once a day.
const DEFAULT_REFERENCE_MAX_AGE_MINUTES: i64 = 24 * 60;

/// Remote endpoint paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Binary upload endpoint returning `{url}` or `{link}`
    pub upload: String,
    /// Document records, created with a reference to the uploaded file
    pub documents: String,
    /// Victim records; a photo is attached with `PATCH {victims}/{id}`
    pub victims: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload: "/upload".to_string(),
            documents: "/document".to_string(),
            victims: "/victime".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub data_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub reference_max_age_minutes: i64,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            reference_max_age_minutes: DEFAULT_REFERENCE_MAX_AGE_MINUTES,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Load the user config file (defaults when absent) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CASECACHE_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(dir) = std::env::var("CASECACHE_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Directory holding the local store.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reference_max_age(&self) -> Duration {
        Duration::minutes(self.reference_max_age_minutes)
    }
}
