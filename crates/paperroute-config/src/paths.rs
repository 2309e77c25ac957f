//! Default locations for the config file and the queue database.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Platform defaults, e.g. `~/.config/paperroute/config.toml` and
/// `~/.local/share/paperroute` on Linux.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// `None` when no home directory can be determined.
    pub fn new() -> Option<Self> {
        let dirs = ProjectDirs::from("", "", "paperroute")?;
        Some(Self {
            config_file: dirs.config_dir().join("config.toml"),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }
}
