use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the driver remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchState {
    /// Host application version the patch directory was last reconciled
    /// against.
    #[serde(default)]
    pub app_version: Option<String>,
    /// Patch version held by the artifact on disk.
    #[serde(default)]
    pub artifact_version: Option<String>,
    #[serde(default)]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl PatchState {
    pub fn load_from_path(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save_to_path(&self, path: &Path) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)
    }

    pub fn record_download(&mut self, version: &str) {
        self.artifact_version = Some(version.to_string());
        self.downloaded_at = Some(Utc::now());
    }

    pub fn clear_artifact(&mut self) {
        self.artifact_version = None;
        self.downloaded_at = None;
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "state path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("state");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique state temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}
