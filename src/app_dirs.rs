use directories::ProjectDirs;
use std::path::PathBuf;

/// Where blinkfix keeps its per-user files.
pub struct AppDirs;

impl AppDirs {
    pub fn config_path() -> PathBuf {
        match ProjectDirs::from("", "", "blinkfix") {
            Some(pd) => pd.config_dir().join("config.json"),
            None => PathBuf::from("blinkfix_config.json"),
        }
    }
}
