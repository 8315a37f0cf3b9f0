//! Upgrade workflow: compare versions, download the advertised patch, and
//! hand the artifact to the patch loader.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::download::{
    DownloadError, DownloadErrorKind, DownloadEvent, DownloadHandler, DownloadProgress,
    DownloadRequest, Downloader,
};
use crate::loader::PatchLoader;
use crate::version::needs_upgrade;

/// Fixed location downloaded patches are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub dir: PathBuf,
    pub file_name: String,
}

impl PatchTarget {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    fn request(&self, url: &str) -> DownloadRequest {
        DownloadRequest::new(url, &self.dir, &self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    Checking,
    NoUpgradeNeeded,
    Downloading {
        downloaded: u64,
        total: Option<u64>,
    },
    DownloadFailed {
        kind: DownloadErrorKind,
        message: String,
    },
    DownloadComplete {
        artifact: PathBuf,
    },
    ApplyRequested {
        artifact: PathBuf,
    },
}

#[derive(Debug)]
pub enum UpgradeOutcome {
    NoUpgradeNeeded,
    DownloadFailed(DownloadError),
    ApplyRequested(PathBuf),
}

pub struct UpgradeController {
    downloader: Downloader,
    target: PatchTarget,
    loader: Arc<dyn PatchLoader>,
    state: UpgradeState,
    transitions: Vec<UpgradeState>,
}

impl UpgradeController {
    pub fn new(downloader: Downloader, target: PatchTarget, loader: Arc<dyn PatchLoader>) -> Self {
        Self {
            downloader,
            target,
            loader,
            state: UpgradeState::Idle,
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &UpgradeState {
        &self.state
    }

    /// States visited by the most recent check, in order. Consecutive
    /// progress updates are folded into a single `Downloading` entry.
    #[must_use]
    pub fn transitions(&self) -> &[UpgradeState] {
        &self.transitions
    }

    /// Download and hand off `latest_version` if it differs from `current`.
    ///
    /// Download events are forwarded to `handler` on the calling task. A
    /// failed download is not retried.
    pub async fn check_for_upgrade(
        &mut self,
        current: Option<&str>,
        latest_version: &str,
        latest_url: &str,
        mut handler: DownloadHandler<'_>,
    ) -> UpgradeOutcome {
        self.transitions.clear();
        self.transition(UpgradeState::Checking);

        if latest_version.is_empty() || latest_url.is_empty() {
            debug!("No patch advertised, nothing to upgrade");
            self.transition(UpgradeState::NoUpgradeNeeded);
            return UpgradeOutcome::NoUpgradeNeeded;
        }

        if !needs_upgrade(current, latest_version) {
            info!("Patch {latest_version} is already current");
            self.transition(UpgradeState::NoUpgradeNeeded);
            return UpgradeOutcome::NoUpgradeNeeded;
        }

        info!(
            "Patch {latest_version} available (current: {}), downloading from {latest_url}",
            current.unwrap_or("none")
        );
        let mut task = self.downloader.start(self.target.request(latest_url));
        self.transition(UpgradeState::Downloading {
            downloaded: 0,
            total: None,
        });

        while let Some(event) = task.next_event().await {
            handler.dispatch(task.url(), &event);
            match event {
                DownloadEvent::Started { .. } => {}
                DownloadEvent::Progress(progress) => self.handle_download_progress(progress),
                DownloadEvent::Completed { path } => return self.handle_download_complete(path),
                DownloadEvent::Failed(error) => return self.handle_download_failed(error),
            }
        }

        self.handle_download_failed(DownloadError::WorkerStopped)
    }

    /// Like [`Self::check_for_upgrade`], using the version reported by the
    /// patch loader as the current one.
    pub async fn check_with_loader_version(
        &mut self,
        latest_version: &str,
        latest_url: &str,
        handler: DownloadHandler<'_>,
    ) -> UpgradeOutcome {
        let current = self.loader.current_version();
        self.check_for_upgrade(current.as_deref(), latest_version, latest_url, handler)
            .await
    }

    fn handle_download_progress(&mut self, progress: DownloadProgress) {
        self.transition(UpgradeState::Downloading {
            downloaded: progress.downloaded,
            total: progress.total,
        });
    }

    fn handle_download_complete(&mut self, artifact: PathBuf) -> UpgradeOutcome {
        info!("Patch downloaded to {}", artifact.display());
        self.transition(UpgradeState::DownloadComplete {
            artifact: artifact.clone(),
        });

        self.loader.apply(&artifact);
        self.transition(UpgradeState::ApplyRequested {
            artifact: artifact.clone(),
        });
        UpgradeOutcome::ApplyRequested(artifact)
    }

    fn handle_download_failed(&mut self, error: DownloadError) -> UpgradeOutcome {
        warn!("Patch download failed: {error}");
        self.transition(UpgradeState::DownloadFailed {
            kind: error.kind(),
            message: error.to_string(),
        });
        UpgradeOutcome::DownloadFailed(error)
    }

    fn transition(&mut self, next: UpgradeState) {
        if matches!(next, UpgradeState::Downloading { .. })
            && let Some(last) = self.transitions.last_mut()
            && matches!(last, UpgradeState::Downloading { .. })
        {
            *last = next.clone();
        } else {
            self.transitions.push(next.clone());
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use super::{PatchTarget, UpgradeController, UpgradeOutcome, UpgradeState};
    use crate::download::{DownloadErrorKind, DownloadHandler, Downloader};
    use crate::loader::PatchLoader;

    #[derive(Default)]
    struct RecordingLoader {
        version: Option<String>,
        applied: Mutex<Vec<PathBuf>>,
    }

    impl PatchLoader for RecordingLoader {
        fn apply(&self, artifact: &Path) {
            self.applied
                .lock()
                .expect("applied lock should not be poisoned")
                .push(artifact.to_path_buf());
        }

        fn current_version(&self) -> Option<String> {
            self.version.clone()
        }
    }

    fn controller(dir: &Path, loader: Arc<RecordingLoader>) -> UpgradeController {
        UpgradeController::new(
            Downloader::new().expect("downloader should build"),
            PatchTarget::new(dir, "patch_signed.apk"),
            loader,
        )
    }

    #[test]
    fn new_controller_starts_idle() {
        let loader = Arc::new(RecordingLoader::default());
        let controller = controller(Path::new("/tmp/hotpatch"), loader);

        assert_eq!(controller.state(), &UpgradeState::Idle);
        assert!(controller.transitions().is_empty());
    }

    #[tokio::test]
    async fn empty_advertisement_skips_upgrade() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let loader = Arc::new(RecordingLoader::default());
        let mut controller = controller(temp.path(), Arc::clone(&loader));

        let outcome = controller
            .check_for_upgrade(Some("v1"), "", "https://example.com/patch", DownloadHandler::new())
            .await;
        assert!(matches!(outcome, UpgradeOutcome::NoUpgradeNeeded));

        let outcome = controller
            .check_for_upgrade(Some("v1"), "v2", "", DownloadHandler::new())
            .await;
        assert!(matches!(outcome, UpgradeOutcome::NoUpgradeNeeded));
        assert_eq!(
            controller.transitions(),
            [UpgradeState::Checking, UpgradeState::NoUpgradeNeeded]
        );
        assert!(loader.applied.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn matching_version_does_not_download() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let patch_dir = temp.path().join("patch");
        let loader = Arc::new(RecordingLoader::default());
        let mut controller = controller(&patch_dir, Arc::clone(&loader));

        let outcome = controller
            .check_for_upgrade(
                Some("v1"),
                "v1",
                "http://127.0.0.1:1/patch",
                DownloadHandler::new(),
            )
            .await;

        assert!(matches!(outcome, UpgradeOutcome::NoUpgradeNeeded));
        assert_eq!(controller.state(), &UpgradeState::NoUpgradeNeeded);
        assert!(!patch_dir.exists());
        assert!(loader.applied.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn loader_version_is_used_as_current() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let loader = Arc::new(RecordingLoader {
            version: Some("abc".to_string()),
            ..RecordingLoader::default()
        });
        let mut controller = controller(temp.path(), Arc::clone(&loader));

        let outcome = controller
            .check_with_loader_version("abc", "http://127.0.0.1:1/patch", DownloadHandler::new())
            .await;

        assert!(matches!(outcome, UpgradeOutcome::NoUpgradeNeeded));
    }

    #[tokio::test]
    async fn invalid_url_ends_in_download_failed() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let loader = Arc::new(RecordingLoader::default());
        let mut controller = controller(temp.path(), Arc::clone(&loader));

        let outcome = controller
            .check_for_upgrade(None, "v2", "ftp://example.com/patch", DownloadHandler::new())
            .await;

        assert!(matches!(outcome, UpgradeOutcome::DownloadFailed(_)));
        assert!(matches!(
            controller.state(),
            UpgradeState::DownloadFailed {
                kind: DownloadErrorKind::InvalidArgument,
                ..
            }
        ));
        assert_eq!(controller.transitions().len(), 3);
        assert!(loader.applied.lock().expect("lock").is_empty());
    }
}
