//! Single-shot HTTP downloads with ordered lifecycle events.
//!
//! [`Downloader::start`] spawns one worker per request. The worker streams the
//! response body to disk and reports back over a channel; the caller consumes
//! the events from the returned [`DownloadTask`] on its own task, so callback
//! code never runs on the worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CHUNK_SIZE: usize = 1024;
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub dir: PathBuf,
    pub file_name: String,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    #[must_use]
    pub fn destination(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes appended to the file since the previous progress event.
    pub chunk: u64,
    pub downloaded: u64,
    /// Length declared by the server, if any.
    pub total: Option<u64>,
}

#[derive(Debug)]
pub enum DownloadEvent {
    Started { url: String },
    Progress(DownloadProgress),
    Completed { path: PathBuf },
    Failed(DownloadError),
}

impl DownloadEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    InvalidArgument,
    Io,
    Network,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Request {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with HTTP {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("download worker stopped before reporting a result")]
    WorkerStopped,
}

impl DownloadError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    fn request(context: &'static str, source: reqwest::Error) -> Self {
        Self::Request { context, source }
    }

    fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DownloadErrorKind {
        match self {
            Self::InvalidUrl { .. } => DownloadErrorKind::InvalidArgument,
            Self::Io { .. } => DownloadErrorKind::Io,
            Self::Request { .. } | Self::HttpStatus { .. } | Self::WorkerStopped => {
                DownloadErrorKind::Network
            }
        }
    }
}

type StartedFn<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type ProgressFn<'a> = Box<dyn FnMut(&str, DownloadProgress) + Send + 'a>;
type CompletedFn<'a> = Box<dyn FnMut(&str, &Path) + Send + 'a>;
type FailedFn<'a> = Box<dyn FnMut(&str, &DownloadError) + Send + 'a>;

/// Optional per-event callbacks. Unset callbacks are skipped.
#[derive(Default)]
pub struct DownloadHandler<'a> {
    on_started: Option<StartedFn<'a>>,
    on_progress: Option<ProgressFn<'a>>,
    on_completed: Option<CompletedFn<'a>>,
    on_failed: Option<FailedFn<'a>>,
}

impl<'a> DownloadHandler<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_started(mut self, callback: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_started = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: impl FnMut(&str, DownloadProgress) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_completed(mut self, callback: impl FnMut(&str, &Path) + Send + 'a) -> Self {
        self.on_completed = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_failed(mut self, callback: impl FnMut(&str, &DownloadError) + Send + 'a) -> Self {
        self.on_failed = Some(Box::new(callback));
        self
    }

    pub fn dispatch(&mut self, url: &str, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started { .. } => {
                if let Some(callback) = self.on_started.as_mut() {
                    callback(url);
                }
            }
            DownloadEvent::Progress(progress) => {
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(url, *progress);
                }
            }
            DownloadEvent::Completed { path } => {
                if let Some(callback) = self.on_completed.as_mut() {
                    callback(url, path);
                }
            }
            DownloadEvent::Failed(error) => {
                if let Some(callback) = self.on_failed.as_mut() {
                    callback(url, error);
                }
            }
        }
    }
}

impl std::fmt::Debug for DownloadHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadHandler")
            .field("on_started", &self.on_started.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .finish()
    }
}

/// A started download. Yields `Started`, then any number of `Progress`
/// events, then exactly one terminal event.
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    events: mpsc::Receiver<DownloadEvent>,
    finished: bool,
}

impl DownloadTask {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the next lifecycle event. Returns `None` once the terminal
    /// event has been delivered.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        if self.finished {
            return None;
        }

        let event = self
            .events
            .recv()
            .await
            .unwrap_or(DownloadEvent::Failed(DownloadError::WorkerStopped));
        if event.is_terminal() {
            self.finished = true;
            self.events.close();
        }
        Some(event)
    }

    /// Drive the download to its terminal event, invoking `handler` for
    /// every event on the calling task.
    ///
    /// # Errors
    /// Returns the error carried by the `Failed` event.
    pub async fn run(mut self, mut handler: DownloadHandler<'_>) -> Result<PathBuf, DownloadError> {
        while let Some(event) = self.next_event().await {
            handler.dispatch(&self.url, &event);
            match event {
                DownloadEvent::Completed { path } => return Ok(path),
                DownloadEvent::Failed(error) => return Err(error),
                DownloadEvent::Started { .. } | DownloadEvent::Progress(_) => {}
            }
        }
        Err(DownloadError::WorkerStopped)
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Build a downloader with the default 10 second connect timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    /// Build a downloader that gives up on connection establishment after
    /// `timeout`. Transfers themselves are not time-bounded.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|source| DownloadError::request("failed to build download client", source))?;
        Ok(Self { client })
    }

    /// Start downloading `request` on a dedicated worker task.
    ///
    /// An invalid URL is reported as the only event without spawning a
    /// worker or touching the filesystem. Must be called from within a Tokio
    /// runtime.
    #[must_use]
    pub fn start(&self, request: DownloadRequest) -> DownloadTask {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = DownloadTask {
            url: request.url.clone(),
            events: rx,
            finished: false,
        };

        if let Err(error) = validate_url(&request.url) {
            warn!("Rejecting download: {error}");
            let _ = tx.try_send(DownloadEvent::Failed(error));
            return task;
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            let terminal = match download(&client, &request, &tx).await {
                Ok(path) => DownloadEvent::Completed { path },
                Err(error) => {
                    warn!("Download of {} failed: {error}", request.url);
                    DownloadEvent::Failed(error)
                }
            };
            let _ = tx.send(terminal).await;
        });

        task
    }
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    if url.is_empty() {
        return Err(DownloadError::invalid_url(url, "url is empty"));
    }
    if !url.starts_with("http") {
        return Err(DownloadError::invalid_url(url, "url must use http or https"));
    }

    let parsed =
        reqwest::Url::parse(url).map_err(|error| DownloadError::invalid_url(url, error.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(url, "url must use http or https"));
    }
    Ok(())
}

async fn prepare_destination(request: &DownloadRequest) -> Result<PathBuf, DownloadError> {
    tokio::fs::create_dir_all(&request.dir)
        .await
        .map_err(|error| {
            DownloadError::io("failed to create download directory", &request.dir, error)
        })?;

    let dest = request.destination();
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&dest)
        .await
        .map_err(|error| DownloadError::io("failed to create download file", &dest, error))?;
    Ok(dest)
}

async fn download(
    client: &reqwest::Client,
    request: &DownloadRequest,
    events: &mpsc::Sender<DownloadEvent>,
) -> Result<PathBuf, DownloadError> {
    let dest = prepare_destination(request).await?;

    let _ = events
        .send(DownloadEvent::Started {
            url: request.url.clone(),
        })
        .await;
    debug!("Downloading {} to {}", request.url, dest.display());

    let response = client
        .get(&request.url)
        .send()
        .await
        .map_err(|error| DownloadError::request("download request failed", error))?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            url: request.url.clone(),
            status: response.status(),
        });
    }

    let total = response.content_length();
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(&dest)
        .await
        .map_err(|error| DownloadError::io("failed to open download file", &dest, error))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| DownloadError::request("download stream error", error))?;
        for slice in chunk.chunks(CHUNK_SIZE) {
            file.write_all(slice).await.map_err(|error| {
                DownloadError::io("failed to write download data", &dest, error)
            })?;
            let written = slice.len() as u64;
            downloaded += written;
            let _ = events
                .send(DownloadEvent::Progress(DownloadProgress {
                    chunk: written,
                    downloaded,
                    total,
                }))
                .await;
        }
    }

    file.flush()
        .await
        .map_err(|error| DownloadError::io("failed to flush download file", &dest, error))?;

    info!("Download complete: {downloaded} bytes written to {}", dest.display());
    Ok(dest)
}
