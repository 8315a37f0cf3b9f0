use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info, warn};
use tokio::process::Command;

/// Boundary to the engine that applies a downloaded patch artifact.
///
/// `apply` is fire-and-forget: callers never observe whether the patch was
/// applied, only that it was handed over.
pub trait PatchLoader: Send + Sync {
    fn apply(&self, artifact: &Path);

    /// Version token of the patch the engine currently has loaded, if any.
    fn current_version(&self) -> Option<String> {
        None
    }
}

/// Hands artifacts to an external patch engine program.
///
/// The artifact path is appended as the last argument and the process is
/// spawned without waiting for it; a runtime task reaps it when it exits.
/// `apply` must be called from within a Tokio runtime. The engine reports
/// the version it has loaded by writing it to `version_file`.
#[derive(Debug, Clone)]
pub struct CommandPatchLoader {
    program: String,
    args: Vec<String>,
    version_file: PathBuf,
}

impl CommandPatchLoader {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        version_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            version_file: version_file.into(),
        }
    }

    fn command(&self, artifact: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl PatchLoader for CommandPatchLoader {
    fn apply(&self, artifact: &Path) {
        info!(
            "Handing patch {} to {}",
            artifact.display(),
            self.program
        );
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Cannot launch patch engine {} outside a runtime", self.program);
            return;
        };

        match self.command(artifact).spawn() {
            Ok(mut child) => {
                debug!("Patch engine started with pid {:?}", child.id());
                runtime.spawn(async move {
                    match child.wait().await {
                        Ok(status) => debug!("Patch engine exited with {status}"),
                        Err(error) => warn!("Failed to wait for patch engine: {error}"),
                    }
                });
            }
            Err(error) => warn!("Failed to launch patch engine {}: {error}", self.program),
        }
    }

    fn current_version(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.version_file).ok()?;
        let version = contents.trim();
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{CommandPatchLoader, PatchLoader};

    #[test]
    fn current_version_reads_trimmed_version_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let version_file = temp.path().join("current_patch_version");
        std::fs::write(&version_file, "  5f2c9a\n").expect("version file should be written");

        let loader = CommandPatchLoader::new("patch-engine", Vec::new(), &version_file);

        assert_eq!(loader.current_version().as_deref(), Some("5f2c9a"));
    }

    #[test]
    fn current_version_is_absent_without_loaded_patch() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let version_file = temp.path().join("current_patch_version");
        let loader = CommandPatchLoader::new("patch-engine", Vec::new(), &version_file);

        assert_eq!(loader.current_version(), None);

        std::fs::write(&version_file, "\n").expect("version file should be written");
        assert_eq!(loader.current_version(), None);
    }

    #[test]
    fn command_appends_artifact_after_configured_args() {
        let loader = CommandPatchLoader::new(
            "patch-engine",
            vec!["--install".to_string()],
            "/tmp/version",
        );

        let command = loader.command(Path::new("/data/patch/patch_signed.apk"));
        let command = command.as_std();
        let args: Vec<_> = command.get_args().collect();

        assert_eq!(command.get_program(), "patch-engine");
        assert_eq!(args, ["--install", "/data/patch/patch_signed.apk"]);
    }

    #[tokio::test]
    async fn apply_with_missing_program_does_not_panic() {
        let loader = CommandPatchLoader::new(
            "hotpatch-engine-that-does-not-exist",
            Vec::new(),
            "/tmp/version",
        );

        loader.apply(Path::new("/tmp/patch_signed.apk"));
    }

    #[test]
    fn apply_outside_runtime_is_skipped() {
        let loader = CommandPatchLoader::new("sh", Vec::new(), "/tmp/version");

        loader.apply(Path::new("/tmp/patch_signed.apk"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_launches_engine_with_artifact_path() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let received = temp.path().join("received");
        let loader = CommandPatchLoader::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("printf '%s' \"$0\" > '{}'", received.display()),
            ],
            temp.path().join("current_patch_version"),
        );
        let artifact = temp.path().join("patch_signed.apk");

        loader.apply(&artifact);

        let mut contents = String::new();
        for _ in 0..100 {
            contents = std::fs::read_to_string(&received).unwrap_or_default();
            if !contents.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(contents, artifact.display().to_string());
    }
}
