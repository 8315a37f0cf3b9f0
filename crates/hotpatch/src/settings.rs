use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use hotpatch_platform::AppPaths;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Patch engine program followed by its leading arguments. The artifact
    /// path is appended when the engine is launched.
    #[serde(default = "default_apply_command")]
    pub apply_command: Vec<String>,

    #[serde(default)]
    pub patch_dir: Option<PathBuf>,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_apply_command() -> Vec<String> {
    vec!["hotpatch-engine".to_string(), "apply".to_string()]
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            apply_command: default_apply_command(),
            patch_dir: None,
        }
    }
}

impl AppSettings {
    /// Read the settings file. A missing file yields the defaults; an
    /// unreadable or malformed one is an error so the caller can report it
    /// once logging is up.
    pub fn load(paths: &AppPaths) -> Result<Self, AppError> {
        Self::load_from_path(&paths.settings_file())
    }

    fn load_from_path(path: &Path) -> Result<Self, AppError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(AppError::io("failed to read settings", error)),
        };
        serde_json::from_str(&content).map_err(|source| AppError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    /// Directory downloaded patches land in.
    pub fn patch_dir(&self, paths: &AppPaths) -> PathBuf {
        self.patch_dir.clone().unwrap_or_else(|| paths.patch_dir())
    }
}
