use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use hotpatch_core::{
    CommandPatchLoader, DownloadErrorKind, DownloadHandler, Downloader, PatchLoader, PatchTarget,
    UpgradeController, UpgradeOutcome,
};
use hotpatch_platform::{AppPaths, PATCH_FILE_NAME};

use crate::error::AppError;
use crate::settings::AppSettings;
use crate::state::PatchState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStatus {
    pub current_version: Option<String>,
    pub artifact: Option<(PathBuf, u64)>,
    pub state: PatchState,
}

/// Process-wide patch state, created once by the driver and passed to
/// everything that needs it.
pub struct PatchContext {
    paths: AppPaths,
    settings: AppSettings,
    downloader: Downloader,
    loader: Arc<dyn PatchLoader>,
    installed: bool,
}

impl PatchContext {
    pub fn new(
        paths: AppPaths,
        settings: AppSettings,
        loader: Arc<dyn PatchLoader>,
    ) -> Result<Self, AppError> {
        let downloader =
            Downloader::with_connect_timeout(Duration::from_secs(settings.connect_timeout_secs))?;
        Ok(Self {
            paths,
            settings,
            downloader,
            loader,
            installed: false,
        })
    }

    /// Build a context whose patch loader launches `settings.apply_command`.
    pub fn with_command_loader(paths: AppPaths, settings: AppSettings) -> Result<Self, AppError> {
        let (program, args) = settings
            .apply_command
            .split_first()
            .ok_or(AppError::NoApplyCommand)?;
        let loader = CommandPatchLoader::new(
            program.clone(),
            args.to_vec(),
            paths.current_version_file(),
        );
        Self::new(paths, settings, Arc::new(loader))
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn patch_dir(&self) -> PathBuf {
        self.settings.patch_dir(&self.paths)
    }

    pub fn patch_file(&self) -> PathBuf {
        self.patch_dir().join(PATCH_FILE_NAME)
    }

    /// Prepare the patch directory. When `app_version` differs from the host
    /// version recorded on a previous run, the downloaded patch was built
    /// against the old host and is discarded.
    ///
    /// Calling this more than once is a no-op.
    pub fn install(&mut self, app_version: Option<&str>) -> Result<(), AppError> {
        if self.installed {
            warn!("install hotpatch, but it is already installed, ignoring");
            return Ok(());
        }

        self.paths
            .ensure_dirs()
            .map_err(|error| AppError::io("failed to create application directories", error))?;
        std::fs::create_dir_all(self.patch_dir())
            .map_err(|error| AppError::io("failed to create patch directory", error))?;

        if let Some(app_version) = app_version {
            let mut state = self.load_state();
            if state.app_version.as_deref() != Some(app_version) {
                info!(
                    "Host version changed ({} -> {app_version}), discarding downloaded patch",
                    state.app_version.as_deref().unwrap_or("unknown")
                );
                self.remove_artifact()?;
                state.clear_artifact();
                state.app_version = Some(app_version.to_string());
                self.save_state(&state)?;
            }
        }

        self.installed = true;
        debug!("hotpatch installed, patch dir: {}", self.patch_dir().display());
        Ok(())
    }

    /// Run the upgrade workflow against the fixed patch location. Without an
    /// explicit `current`, the version reported by the patch loader is used.
    pub async fn check_upgrade(
        &self,
        current: Option<&str>,
        latest_version: &str,
        latest_url: &str,
        handler: DownloadHandler<'_>,
    ) -> Result<UpgradeOutcome, AppError> {
        if !self.is_installed() {
            return Err(AppError::NotInstalled);
        }

        let mut controller = UpgradeController::new(
            self.downloader.clone(),
            PatchTarget::new(self.patch_dir(), PATCH_FILE_NAME),
            Arc::clone(&self.loader),
        );
        let outcome = match current {
            Some(current) => {
                controller
                    .check_for_upgrade(Some(current), latest_version, latest_url, handler)
                    .await
            }
            None => {
                controller
                    .check_with_loader_version(latest_version, latest_url, handler)
                    .await
            }
        };

        match &outcome {
            UpgradeOutcome::ApplyRequested(_) => {
                let mut state = self.load_state();
                state.record_download(latest_version);
                self.save_state(&state)?;
            }
            // The artifact is rewritten in place, so a failed transfer may
            // have left a truncated file behind.
            UpgradeOutcome::DownloadFailed(error)
                if error.kind() != DownloadErrorKind::InvalidArgument =>
            {
                warn!("Discarding downloaded patch after failed download: {error}");
                self.clean_patch()?;
            }
            UpgradeOutcome::DownloadFailed(_) | UpgradeOutcome::NoUpgradeNeeded => {}
        }
        Ok(outcome)
    }

    /// Hand the previously downloaded patch to the loader again.
    pub fn apply_existing(&self) -> Result<PathBuf, AppError> {
        if !self.installed {
            return Err(AppError::NotInstalled);
        }

        let artifact = self.patch_file();
        let has_content = std::fs::metadata(&artifact).is_ok_and(|metadata| {
            metadata.is_file() && metadata.len() > 0
        });
        if !has_content {
            return Err(AppError::NoArtifact(artifact));
        }

        self.loader.apply(&artifact);
        Ok(artifact)
    }

    /// Delete the downloaded patch. Returns whether there was one.
    pub fn clean_patch(&self) -> Result<bool, AppError> {
        let removed = self.remove_artifact()?;
        let mut state = self.load_state();
        if state.artifact_version.is_some() {
            state.clear_artifact();
            self.save_state(&state)?;
        }
        Ok(removed)
    }

    pub fn status(&self) -> PatchStatus {
        let artifact_path = self.patch_file();
        let artifact = std::fs::metadata(&artifact_path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|metadata| (artifact_path, metadata.len()));
        PatchStatus {
            current_version: self.loader.current_version(),
            artifact,
            state: self.load_state(),
        }
    }

    fn remove_artifact(&self) -> Result<bool, AppError> {
        match std::fs::remove_file(self.patch_file()) {
            Ok(()) => {
                info!("Removed patch {}", self.patch_file().display());
                Ok(true)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(AppError::io("failed to remove downloaded patch", error)),
        }
    }

    fn load_state(&self) -> PatchState {
        PatchState::load_from_path(&self.paths.state_file())
    }

    fn save_state(&self, state: &PatchState) -> Result<(), AppError> {
        state
            .save_to_path(&self.paths.state_file())
            .map_err(|error| AppError::io("failed to save patch state", error))
    }
}
