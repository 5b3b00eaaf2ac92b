//! Config file loading and merging with command-line flags.
//!
//! Precedence is command line, then config file, then built-in default.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mirror_core::{
    CacheCapacity, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_RATE_LIMIT_INTERVAL, MAX_CONCURRENCY, MirrorOptions,
};
use serde::{Deserialize, Serialize};

use crate::cli::GlobalArgs;

const CONFIG_DIR_NAME: &str = "arxiv-mirror";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Mirror root used when neither `--root` nor the config file names one.
pub(crate) const DEFAULT_ROOT: &str = "arxiv-mirror";

const MAX_RATE_LIMIT_MS: u64 = 60_000;
const MAX_RETRIES_LIMIT: u32 = 10;
const MAX_BATCH_SIZE: usize = 100_000;

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub(crate) root: Option<PathBuf>,
    pub(crate) oai_base_url: Option<String>,
    pub(crate) artifact_base_url: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) concurrency: Option<usize>,
    pub(crate) rate_limit_ms: Option<u64>,
    pub(crate) batch_size: Option<usize>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) cache_items: Option<usize>,
    pub(crate) cache_bytes: Option<usize>,
    pub(crate) db_max_connections: Option<u32>,
}

impl FileConfig {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency {
            if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
                bail!("concurrency = {concurrency}: expected 1..={MAX_CONCURRENCY}");
            }
        }
        if let Some(rate_limit) = self.rate_limit_ms {
            if rate_limit > MAX_RATE_LIMIT_MS {
                bail!("rate_limit_ms = {rate_limit}: expected 0..={MAX_RATE_LIMIT_MS}");
            }
        }
        if let Some(batch_size) = self.batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
                bail!("batch_size = {batch_size}: expected 1..={MAX_BATCH_SIZE}");
            }
        }
        if let Some(retries) = self.max_retries {
            if retries > MAX_RETRIES_LIMIT {
                bail!("max_retries = {retries}: expected 0..={MAX_RETRIES_LIMIT}");
            }
        }
        if self.cache_items.is_some() && self.cache_bytes.is_some() {
            bail!("set either cache_items or cache_bytes, not both");
        }
        if self.cache_items == Some(0) || self.cache_bytes == Some(0) {
            bail!("cache size must be positive");
        }
        if let Some(connections) = self.db_max_connections {
            if !(1..=mirror_core::mirror::MAX_DB_CONNECTIONS).contains(&connections) {
                bail!(
                    "db_max_connections = {connections}: expected 1..={}",
                    mirror_core::mirror::MAX_DB_CONNECTIONS
                );
            }
        }
        Ok(())
    }
}

/// A config file and where it came from.
#[derive(Debug, Default)]
pub(crate) struct LoadedConfig {
    pub(crate) path: Option<PathBuf>,
    pub(crate) config: Option<FileConfig>,
}

/// `$XDG_CONFIG_HOME/arxiv-mirror/config.toml`, else `$HOME/.config/...`.
pub(crate) fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Loads `explicit` (which must exist) or the default path (which may not).
pub(crate) fn load_file_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(LoadedConfig::default()),
        },
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(LoadedConfig {
                path: Some(path),
                config: None,
            });
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading config file {}", path.display()));
        }
    };
    let config = FileConfig::parse(&text)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(LoadedConfig {
        path: Some(path),
        config: Some(config),
    })
}

/// Effective settings after merging flags over the config file.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) mirror: MirrorOptions,
    pub(crate) concurrency: usize,
    pub(crate) rate_limit: Duration,
    pub(crate) batch_size: usize,
    pub(crate) max_retries: u32,
}

pub(crate) fn resolve_settings(global: &GlobalArgs, file: Option<&FileConfig>) -> Result<Settings> {
    let file = file.cloned().unwrap_or_default();

    let root = global
        .root
        .clone()
        .or(file.root)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    let mut mirror = MirrorOptions::new(root);
    if let Some(url) = global.oai_url.clone().or(file.oai_base_url) {
        mirror.oai_base_url = url;
    }
    if let Some(url) = global.artifact_url.clone().or(file.artifact_base_url) {
        mirror.artifact_base_url = url;
    }
    if let Some(agent) = file.user_agent {
        mirror.user_agent = agent;
    }
    if let Some(connections) = file.db_max_connections {
        mirror.db_max_connections = connections;
    }
    if let Some(bytes) = file.cache_bytes {
        mirror.cache_capacity = CacheCapacity::Bytes(bytes);
    } else if let Some(items) = file.cache_items.and_then(NonZeroUsize::new) {
        mirror.cache_capacity = CacheCapacity::Items(items);
    }

    let rate_limit_ms = global.rate_limit_ms.or(file.rate_limit_ms);
    let rate_limit = rate_limit_ms.map_or(DEFAULT_RATE_LIMIT_INTERVAL, Duration::from_millis);
    if rate_limit > Duration::from_millis(MAX_RATE_LIMIT_MS) {
        bail!(
            "Invalid effective rate limit: {} ms. Expected range: 0..={MAX_RATE_LIMIT_MS}",
            rate_limit.as_millis()
        );
    }
    mirror.request_interval = rate_limit;

    let settings = Settings {
        mirror,
        concurrency: file.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        rate_limit,
        batch_size: file.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
    };
    settings.mirror.validate()?;
    Ok(settings)
}
