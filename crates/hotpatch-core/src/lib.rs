//! Client-side patch update coordination.
//!
//! This crate decides whether a newer patch artifact is available, fetches it
//! in the background with progress events, and hands the downloaded file to
//! an external patch engine:
//! - Patch version comparison.
//! - Single-shot streaming downloads with ordered lifecycle events.
//! - The patch loader boundary and a command-based adapter.
//! - The upgrade workflow that ties the three together.

pub mod download;
pub mod loader;
pub mod upgrade;
mod version;

/// Download request/task types, lifecycle events, and the engine itself.
pub use download::{
    DownloadError, DownloadErrorKind, DownloadEvent, DownloadHandler, DownloadProgress,
    DownloadRequest, DownloadTask, Downloader,
};
/// Boundary to the external patch application engine.
pub use loader::{CommandPatchLoader, PatchLoader};
/// Upgrade workflow controller and its observable states.
pub use upgrade::{PatchTarget, UpgradeController, UpgradeOutcome, UpgradeState};
/// Patch version comparison.
pub use version::needs_upgrade;
