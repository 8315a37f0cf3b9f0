use std::path::PathBuf;

use hotpatch_core::DownloadError;
use hotpatch_platform::AppPathsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Paths(#[from] AppPathsError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("hotpatch is not installed")]
    NotInstalled,

    #[error("no downloaded patch at {}", .0.display())]
    NoArtifact(PathBuf),

    #[error("apply_command is empty, cannot launch the patch engine")]
    NoApplyCommand,
}

impl AppError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::AppError;

    #[test]
    fn io_error_display_includes_context() {
        let error = AppError::io("failed to save patch state", std::io::Error::other("disk full"));

        assert_eq!(error.to_string(), "failed to save patch state: disk full");
    }

    #[test]
    fn no_artifact_display_includes_path() {
        let error = AppError::NoArtifact(PathBuf::from("/data/patch/patch_signed.apk"));

        assert_eq!(
            error.to_string(),
            "no downloaded patch at /data/patch/patch_signed.apk"
        );
    }
}
