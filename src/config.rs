use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::filter::{FilterParams, FilterPatch};

/// Per-user defaults, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub default_filter: FilterParams,
    #[serde(default)]
    pub last_collection: Option<PathBuf>,
}

impl Config {
    /// Stored defaults with command-line overrides applied. Invalid overrides
    /// are reported and the stored value kept.
    pub fn filter_with(&self, overrides: &FilterPatch) -> FilterParams {
        match self.default_filter.patched(overrides) {
            Ok(params) => params,
            Err(e) => {
                warn!("ignoring filter override: {e}");
                self.default_filter
            }
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) if cfg.default_filter.validate().is_ok() => cfg,
            Ok(_) => {
                warn!("{}: invalid filter defaults, using built-ins", self.path.display());
                Config::default()
            }
            Err(e) => {
                warn!("{}: unreadable config ({e}), using defaults", self.path.display());
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
