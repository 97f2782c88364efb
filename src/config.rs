use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Application configuration, loaded from a YAML file. Every field has a
/// default so a missing file or a partial file still yields a working
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen: String,
    /// Directory for the translation cache and feed archive files.
    pub cache_dir: PathBuf,
    /// JSON file holding the configured feed sources.
    pub sources_file: PathBuf,
    pub fetch: FetchConfig,
    pub translation: TranslationConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// How long fetched items are served from memory before re-fetching.
    pub cache_ttl_secs: u64,
    /// Per-request timeout for feed endpoints.
    pub timeout_secs: u64,
    /// Feeds are newest-first; only this many items are kept per source.
    pub max_items_per_source: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Chat-completion endpoint.
    pub api_url: String,
    pub model: String,
    /// Environment variable holding the API key. When unset, translation
    /// is skipped and items pass through untranslated.
    pub api_key_env: String,
    /// Items per upstream batch request.
    pub batch_size: usize,
    /// Cached translations older than this are pruned on load.
    pub cache_retention_days: i64,
    /// Explicit timeout for translation requests.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archived items older than this are pruned on load and save.
    pub retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            cache_dir: PathBuf::from(".cache"),
            sources_file: PathBuf::from("data/feeds.json"),
            fetch: FetchConfig::default(),
            translation: TranslationConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            timeout_secs: 10,
            max_items_per_source: 20,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            batch_size: 10,
            cache_retention_days: 3,
            timeout_secs: 60,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { retention_days: 14 }
    }
}

impl Config {
    /// Load configuration from a YAML file. A missing file is not an
    /// error; a malformed one is.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
