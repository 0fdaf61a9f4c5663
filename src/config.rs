//! Configuration for offsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (OFFSYNC_HOME, OFFSYNC_SEARCH_URL, OFFSYNC_API_URL)
//! 2. Config file (.offsync/config.yaml)
//! 3. Defaults (~/.offsync, public search endpoint, local API)
//!
//! Config file discovery:
//! - Searches current directory and parents for .offsync/config.yaml
//! - `paths.home` in the config file is relative to the .offsync/ directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;

use crate::core::worker::RetryPolicy;

pub use paths::{cache_db_path, offsync_home, queue_log_path};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_SEARCH_URL: &str = "https://graphql.lottiefiles.com/";
pub const DEFAULT_API_URL: &str = "http://localhost:8787/api";
pub const DEFAULT_ASSET_PATTERN: &str = "https://assets-v2.lottiefiles.com/a/*.json";
pub const DEFAULT_MAX_ASSET_ENTRIES: usize = 200;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub endpoints: Option<EndpointsConfig>,
    #[serde(default)]
    pub assets: Option<AssetsConfig>,
    #[serde(default)]
    pub precache: Option<PrecacheConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the .offsync/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    pub search_url: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    /// Glob patterns over full URLs
    pub patterns: Option<Vec<String>>,
    pub max_entries: Option<usize>,
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrecacheConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub poll_interval_ms: Option<u64>,
}

/// Resolved configuration with absolute paths and parsed URLs
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to offsync home (queues, caches)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Remote endpoints
    pub endpoints: Endpoints,
    /// Static asset caching
    pub assets: AssetSettings,
    /// URLs fetched into the caches on install
    pub precache_urls: Vec<String>,
    /// Backoff for re-signalling halted queues
    pub sync: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    /// GraphQL search endpoint (exact URL match)
    pub search_url: Url,
    /// Library API base; saves POST here, removes DELETE `<api_url>/<cursor>`
    pub api_url: Url,
}

impl Endpoints {
    pub fn defaults() -> Result<Self> {
        Ok(Self {
            search_url: parse_url(DEFAULT_SEARCH_URL, "search_url")?,
            api_url: parse_url(DEFAULT_API_URL, "api_url")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSettings {
    pub patterns: Vec<String>,
    pub max_entries: usize,
    pub quota_bytes: Option<u64>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            patterns: vec![DEFAULT_ASSET_PATTERN.to_string()],
            max_entries: DEFAULT_MAX_ASSET_ENTRIES,
            quota_bytes: None,
        }
    }
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every other setting defaulted
    pub fn with_home(home: PathBuf) -> Result<Self> {
        Ok(Self {
            home,
            config_file: None,
            endpoints: Endpoints::defaults()?,
            assets: AssetSettings::default(),
            precache_urls: Vec::new(),
            sync: RetryPolicy::default(),
        })
    }

    pub fn queue_log_path(&self) -> PathBuf {
        paths::queue_log_in(&self.home)
    }

    pub fn cache_db_path(&self) -> PathBuf {
        paths::cache_db_in(&self.home)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".offsync").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn parse_url(value: &str, what: &str) -> Result<Url> {
    Url::parse(value).with_context(|| format!("Invalid {}: {}", what, value))
}

/// Merge a parsed config file and environment overrides onto the defaults
fn resolve_config<E>(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: E,
) -> Result<ResolvedConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = ResolvedConfig::with_home(default_home)?;

    if let Some((config_path, file)) = file {
        if let Some(ref home_path) = file.paths.home {
            // home is relative to .offsync/ directory
            let offsync_dir = config_path.parent().unwrap_or(Path::new("."));
            config.home = resolve_path(offsync_dir, home_path);
        }

        if let Some(endpoints) = file.endpoints {
            if let Some(url) = endpoints.search_url {
                config.endpoints.search_url = parse_url(&url, "search_url")?;
            }
            if let Some(url) = endpoints.api_url {
                config.endpoints.api_url = parse_url(&url, "api_url")?;
            }
        }

        if let Some(assets) = file.assets {
            if let Some(patterns) = assets.patterns {
                config.assets.patterns = patterns;
            }
            config.assets.max_entries = assets.max_entries.unwrap_or(config.assets.max_entries);
            config.assets.quota_bytes = assets.quota_bytes;
        }

        if let Some(precache) = file.precache {
            config.precache_urls = precache.urls;
        }

        if let Some(sync) = file.sync {
            let defaults = RetryPolicy::default();
            config.sync = RetryPolicy {
                initial_delay_ms: sync.initial_delay_ms.unwrap_or(defaults.initial_delay_ms),
                max_delay_ms: sync.max_delay_ms.unwrap_or(defaults.max_delay_ms),
                backoff_multiplier: sync.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
                poll_interval_ms: sync.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            };
        }

        config.config_file = Some(config_path);
    }

    if let Some(home) = env("OFFSYNC_HOME") {
        config.home = PathBuf::from(home);
    }
    if let Some(url) = env("OFFSYNC_SEARCH_URL") {
        config.endpoints.search_url = parse_url(&url, "OFFSYNC_SEARCH_URL")?;
    }
    if let Some(url) = env("OFFSYNC_API_URL") {
        config.endpoints.api_url = parse_url(&url, "OFFSYNC_API_URL")?;
    }

    for pattern in &config.assets.patterns {
        glob::Pattern::new(pattern)
            .with_context(|| format!("Invalid asset pattern: {}", pattern))?;
    }

    Ok(config)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".offsync");

    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    resolve_config(default_home, file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the global cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
