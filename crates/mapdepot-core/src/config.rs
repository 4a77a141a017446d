use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetcher::FetchOptions;

/// File name of the ledger when `ledger_path` is not configured.
pub const DEFAULT_LEDGER_FILE: &str = "downloaded_maps.json";
/// File name of the foreign to English name mapping when `name_mapping_path` is not configured.
pub const DEFAULT_NAME_MAPPING_FILE: &str = "map_foreign_to_english_mapping.json";

/// Global configuration loaded from `~/.config/mapdepot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapdepotConfig {
    /// Directory fetched assets are written to. Defaults to `~/.local/share/mapdepot/maps`.
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    /// Ledger file. Defaults to `downloaded_maps.json` inside the asset directory's parent.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    /// JSON map of foreign map names to English names, rewritten after each fetch.
    /// Defaults to `map_foreign_to_english_mapping.json` beside the ledger default.
    #[serde(default)]
    pub name_mapping_path: Option<PathBuf>,
    /// Maximum concurrent fetch jobs (worker pool size).
    pub max_concurrency: usize,
    /// Number of caller threads issuing resolves during a batch.
    pub caller_threads: usize,
    /// TCP/TLS connect timeout per request.
    pub connect_timeout_secs: u64,
    /// Overall timeout per request, including the body transfer.
    pub timeout_secs: u64,
    /// Abort a transfer slower than this many bytes/sec for `low_speed_time_secs`.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
}

impl Default for MapdepotConfig {
    fn default() -> Self {
        Self {
            asset_dir: None,
            ledger_path: None,
            name_mapping_path: None,
            max_concurrency: 4,
            caller_threads: 8,
            connect_timeout_secs: 15,
            timeout_secs: 300,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
        }
    }
}

impl MapdepotConfig {
    /// Effective asset directory (configured or XDG data default).
    pub fn asset_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.asset_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("mapdepot")?;
        Ok(xdg_dirs.get_data_home().join("mapdepot").join("maps"))
    }

    /// Effective ledger path. Sits beside the asset directory, never inside it,
    /// so it is not counted as an asset during reconciliation.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(path.clone()),
            None => self.beside_asset_dir(DEFAULT_LEDGER_FILE),
        }
    }

    /// Effective name mapping path.
    pub fn name_mapping_path(&self) -> Result<PathBuf> {
        match &self.name_mapping_path {
            Some(path) => Ok(path.clone()),
            None => self.beside_asset_dir(DEFAULT_NAME_MAPPING_FILE),
        }
    }

    fn beside_asset_dir(&self, file: &str) -> Result<PathBuf> {
        let asset_dir = self.asset_dir()?;
        let parent = asset_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(parent.join(file))
    }

    /// Create the asset directory. Failing here is fatal for a run.
    pub fn ensure_asset_dir(&self) -> Result<PathBuf> {
        let dir = self.asset_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("create asset directory: {}", dir.display()))?;
        Ok(dir)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            low_speed_limit: self.low_speed_limit_bytes,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mapdepot")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MapdepotConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MapdepotConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<MapdepotConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: MapdepotConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
