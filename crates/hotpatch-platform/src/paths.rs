use std::path::PathBuf;
use thiserror::Error;

/// File name the downloaded patch artifact is stored under inside
/// [`AppPaths::patch_dir`].
pub const PATCH_FILE_NAME: &str = "patch_signed.apk";

const APP_DIR_NAME: &str = "hotpatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Build application paths for the current platform.
    ///
    /// # Errors
    /// Returns an error when a required base directory (for example the user
    /// home/config/data directory) cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;
            let app_support = home.join("Library/Application Support").join(APP_DIR_NAME);
            Ok(Self {
                config_dir: app_support.clone(),
                data_dir: app_support,
            })
        }

        #[cfg(not(target_os = "macos"))]
        {
            Ok(Self {
                config_dir: dirs::config_dir()
                    .ok_or(AppPathsError::ConfigDirUnavailable)?
                    .join(APP_DIR_NAME),
                data_dir: dirs::data_dir()
                    .ok_or(AppPathsError::DataDirUnavailable)?
                    .join(APP_DIR_NAME),
            })
        }
    }

    /// Paths rooted under a single directory, used when the driver is pointed
    /// at an explicit location instead of the platform defaults.
    #[must_use]
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("patch-state.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    /// File the external patch engine writes the currently loaded patch
    /// version into.
    #[must_use]
    pub fn current_version_file(&self) -> PathBuf {
        self.data_dir.join("current_patch_version")
    }

    #[must_use]
    pub fn patch_dir(&self) -> PathBuf {
        self.data_dir.join("patch")
    }

    /// Ensure all application directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.patch_dir())?;
        Ok(())
    }
}
