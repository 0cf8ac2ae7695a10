use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::enrich::RateLimit;
use crate::store::CacheFormat;

/// Name of the config file picked up from the working directory when no
/// explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "flixcache.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    /// Per-request upstream timeout.
    pub timeout_secs: u64,
    /// Detail fetches in flight at once.
    pub max_concurrent: usize,
    /// Window over which `max_concurrent` calls are spread.
    pub rate_period_ms: u64,
    pub background_workers: usize,
    pub page_size: usize,
    pub data_dir: PathBuf,
    pub cache_format: CacheFormat,
    /// Refreshes are skipped while the collection is younger than this.
    pub ttl_secs: Option<u64>,
    pub tmdb_api_key: Option<String>,
    /// TMDb API root that `/tv/{id}` lookups are made against.
    pub tmdb_api_base: String,
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://superflixapi.nexus".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
            timeout_secs: 5,
            max_concurrent: 5,
            rate_period_ms: 1000,
            background_workers: 2,
            page_size: 50,
            data_dir: default_data_dir(),
            cache_format: CacheFormat::default(),
            ttl_secs: None,
            tmdb_api_key: None,
            tmdb_api_base: "https://api.themoviedb.org/3".to_string(),
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "flixcache", "flixcache")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl Config {
    /// Load `path` (or `flixcache.toml` when present), then apply `FLIXCACHE_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
        let cfg = toml::from_str(&raw).with_context(|| format!("parsing config: {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Override fields from environment-style lookups. Unparseable values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(%key, value = %raw, "ignoring unparseable environment override");
                    None
                }
            }
        }

        if let Some(v) = lookup("FLIXCACHE_BASE_URL") { self.base_url = v; }
        if let Some(v) = lookup("FLIXCACHE_USER_AGENT") { self.user_agent = v; }
        if let Some(v) = parsed("FLIXCACHE_TIMEOUT_SECS", lookup("FLIXCACHE_TIMEOUT_SECS")) { self.timeout_secs = v; }
        if let Some(v) = parsed("FLIXCACHE_MAX_CONCURRENT", lookup("FLIXCACHE_MAX_CONCURRENT")) { self.max_concurrent = v; }
        if let Some(v) = parsed("FLIXCACHE_RATE_PERIOD_MS", lookup("FLIXCACHE_RATE_PERIOD_MS")) { self.rate_period_ms = v; }
        if let Some(v) = parsed("FLIXCACHE_BACKGROUND_WORKERS", lookup("FLIXCACHE_BACKGROUND_WORKERS")) { self.background_workers = v; }
        if let Some(v) = parsed("FLIXCACHE_PAGE_SIZE", lookup("FLIXCACHE_PAGE_SIZE")) { self.page_size = v; }
        if let Some(v) = lookup("FLIXCACHE_DATA_DIR") { self.data_dir = PathBuf::from(v); }
        if let Some(v) = lookup("FLIXCACHE_CACHE_FORMAT") {
            match v.trim().to_ascii_lowercase().as_str() {
                "bare" => self.cache_format = CacheFormat::Bare,
                "stamped" => self.cache_format = CacheFormat::Stamped,
                _ => warn!(value = %v, "ignoring unknown FLIXCACHE_CACHE_FORMAT"),
            }
        }
        if let Some(v) = parsed("FLIXCACHE_TTL_SECS", lookup("FLIXCACHE_TTL_SECS")) { self.ttl_secs = Some(v); }
        if let Some(v) = lookup("FLIXCACHE_TMDB_API_KEY").filter(|k| !k.trim().is_empty()) { self.tmdb_api_key = Some(v); }
        if let Some(v) = lookup("FLIXCACHE_TMDB_API_BASE") { self.tmdb_api_base = v; }
        if let Some(v) = lookup("FLIXCACHE_BIND") { self.bind = v; }
    }

    pub fn validate(&self) -> Result<()> {
        self.base().with_context(|| format!("invalid base_url `{}`", self.base_url))?;
        anyhow::ensure!(self.page_size > 0, "page_size must be at least 1");
        Ok(())
    }

    pub fn base(&self) -> Result<Url> { Ok(Url::parse(&self.base_url)?) }

    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::new(self.max_concurrent, Duration::from_millis(self.rate_period_ms))
    }

    pub fn ttl(&self) -> Option<Duration> { self.ttl_secs.map(Duration::from_secs) }

    /// Path of a collection or code-list file inside `data_dir`.
    pub fn data_file(&self, name: &str) -> PathBuf { self.data_dir.join(name) }
}
