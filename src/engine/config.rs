// Athena Engine — Paths & Config Loading
//
// Everything lives under ~/.athena/ by default:
//   ~/.athena/config.toml — optional BrainConfig overrides
//   ~/.athena/brain.db    — the vault (SQLite)

use std::path::{Path, PathBuf};

use log::info;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::BrainConfig;

const ATHENA_DIR: &str = ".athena";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "brain.db";

/// `~/.athena`, falling back to the platform data dir when there is no home.
pub fn athena_dir() -> EngineResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(ATHENA_DIR))
        .or_else(|| dirs::data_dir().map(|data| data.join("athena")))
        .ok_or_else(|| EngineError::Config("cannot resolve a home or data directory".into()))
}

pub fn default_config_path() -> EngineResult<PathBuf> {
    Ok(athena_dir()?.join(CONFIG_FILE))
}

/// Default vault location. Creates the parent directory if needed.
pub fn default_db_path() -> EngineResult<PathBuf> {
    let dir = athena_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(DB_FILE))
}

/// Resolve the DB path from config, else the default.
pub fn resolve_db_path(config: &BrainConfig) -> EngineResult<PathBuf> {
    match config.vault.db_path {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(path.clone())
        }
        None => default_db_path(),
    }
}

/// Load a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> EngineResult<BrainConfig> {
    if !path.exists() {
        info!("[config] No config at {:?} — using defaults", path);
        return Ok(BrainConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config = BrainConfig::from_toml_str(&raw).map_err(|e| e.context("load_config"))?;
    info!("[config] Loaded config from {:?}", path);
    Ok(config)
}

impl BrainConfig {
    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        load_config(path)
    }

    /// Load `~/.athena/config.toml`, or defaults when it does not exist.
    pub fn load_default() -> EngineResult<Self> {
        load_config(&default_config_path()?)
    }
}
