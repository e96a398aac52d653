use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RunaError;

pub const DEFAULT_CONFIG_FILE: &str = "runa-ab.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:56664";
pub const DEFAULT_ARCHIVE_NAME: &str = "download.zip";
pub const DEFAULT_MAP_STYLE: &str = "mapbox://styles/mapbox/light-v9";

/// Raw on-disk shape of `runa-ab.json`. Every field is optional; the
/// loader fills in defaults while resolving.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub archive_name: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub map_style: Option<String>,
    #[serde(default)]
    pub max_concurrent_fetches: Option<usize>,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub container_wait_ms: Option<u64>,
    #[serde(default)]
    pub frame_interval_ms: Option<u64>,
    #[serde(default)]
    pub chunk_size_kib: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: Url,
    pub archive_name: String,
    pub download_dir: Utf8PathBuf,
    pub map_style: String,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub container_wait: Duration,
    pub frame_interval: Duration,
    pub chunk_size: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and resolves the config. An explicit `path` must exist; the
    /// default `runa-ab.json` is optional and its absence yields defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RunaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RunaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RunaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RunaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(RunaError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .parse::<Url>()
            .map_err(|err| RunaError::ConfigParse(format!("base_url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RunaError::ConfigParse(format!(
                "base_url {base_url} cannot serve as a base origin"
            )));
        }

        let archive_name = config
            .archive_name
            .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());
        if archive_name.trim().is_empty() || archive_name.contains('/') {
            return Err(RunaError::ConfigParse(format!(
                "archive_name {archive_name:?} must be a bare file name"
            )));
        }

        let download_dir = match config.download_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_download_dir()?,
        };

        let max_concurrent_fetches = config.max_concurrent_fetches.unwrap_or(6);
        if max_concurrent_fetches == 0 {
            return Err(RunaError::ConfigParse(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }

        let chunk_size_kib = config.chunk_size_kib.unwrap_or(64);
        if chunk_size_kib == 0 {
            return Err(RunaError::ConfigParse(
                "chunk_size_kib must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            base_url,
            archive_name,
            download_dir,
            map_style: config
                .map_style
                .unwrap_or_else(|| DEFAULT_MAP_STYLE.to_string()),
            max_concurrent_fetches,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs.unwrap_or(60)),
            container_wait: Duration::from_millis(config.container_wait_ms.unwrap_or(5000)),
            frame_interval: Duration::from_millis(config.frame_interval_ms.unwrap_or(16)),
            chunk_size: chunk_size_kib * 1024,
        })
    }

    /// Writes a fully populated default `runa-ab.json` atomically.
    pub fn write_default(path: Option<&str>) -> Result<PathBuf, RunaError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let parent = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let template = Config {
            schema_version: Some(1),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            archive_name: Some(DEFAULT_ARCHIVE_NAME.to_string()),
            download_dir: None,
            map_style: Some(DEFAULT_MAP_STYLE.to_string()),
            max_concurrent_fetches: Some(6),
            fetch_timeout_secs: Some(60),
            container_wait_ms: Some(5000),
            frame_interval_ms: Some(16),
            chunk_size_kib: Some(64),
        };
        let content = serde_json::to_string_pretty(&template)
            .map_err(|err| RunaError::ConfigParse(err.to_string()))?;

        let temp = tempfile::Builder::new()
            .prefix("runa-ab-config")
            .tempfile_in(&parent)
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content.as_bytes())
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        temp.persist(&config_path)
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        Ok(config_path)
    }
}

fn default_download_dir() -> Result<Utf8PathBuf, RunaError> {
    let dirs = UserDirs::new()
        .ok_or_else(|| RunaError::Filesystem("unable to resolve home directory".to_string()))?;
    let dir = dirs
        .download_dir()
        .map(|path| path.to_path_buf())
        .unwrap_or_else(|| dirs.home_dir().join("Downloads"));
    Utf8PathBuf::from_path_buf(dir)
        .map_err(|_| RunaError::Filesystem("download directory is not valid UTF-8".to_string()))
}
