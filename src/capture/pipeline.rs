use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::session::{CaptureSession, DownloadTerminal, SessionOutcome};
use super::staging::StagingArea;
use super::ArtifactProcessor;
use crate::config::Config;
use crate::events::EventRelay;
use crate::protocol::ProcessOptions;

/// What the browser knows about a download when it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub filename: String,
    pub source_url: Option<String>,
    /// URL of the page that triggered the download
    pub referrer_url: Option<String>,
}

/// Answer to a download-initiation event
#[derive(Debug)]
pub enum Interception {
    /// Not ours; the browser saves the file the way it normally would
    PassThrough,
    /// Write the download to `session.staged_path()` and report its progress
    /// and terminal state to the session
    Captured(CaptureSession),
}

/// The browser's download-initiation hook.
///
/// The embedding shell calls this once per download, before any bytes are
/// written.
pub trait DownloadHook: Send + Sync {
    fn on_download(&self, request: DownloadRequest) -> Interception;
}

/// Filters downloads by extension and stages the recognized ones for the
/// worker
pub struct CapturePipeline {
    staging: StagingArea,
    /// Lowercase, without leading dot
    extensions: Vec<String>,
    processor: Arc<dyn ArtifactProcessor>,
    relay: EventRelay,
    options: ProcessOptions,
}

impl CapturePipeline {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        extensions: &[String],
        processor: Arc<dyn ArtifactProcessor>,
        relay: EventRelay,
    ) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            staging: StagingArea::new(staging_dir),
            extensions,
            processor,
            relay,
            options: ProcessOptions::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        processor: Arc<dyn ArtifactProcessor>,
        relay: EventRelay,
    ) -> Self {
        Self::new(
            config.capture.staging_dir(),
            &config.capture.extensions,
            processor,
            relay,
        )
        .with_process_options(ProcessOptions {
            library_root: config.library_root(),
            overwrite: false,
        })
    }

    /// Options forwarded with every `process_download` call
    pub fn with_process_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.dir()
    }

    /// True when `filename` has one of the captured extensions (any case)
    pub fn is_recognized(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|known| *known == ext))
    }

    /// Decide whether to capture a download and, if so, open its session.
    ///
    /// If the staging file cannot be created the download is let through
    /// rather than lost.
    pub fn intercept(&self, request: DownloadRequest) -> Interception {
        if !self.is_recognized(&request.filename) {
            debug!(filename = %request.filename, "Download not captured");
            return Interception::PassThrough;
        }

        let staged = match self.staging.stage(&request.filename) {
            Ok(staged) => staged,
            Err(e) => {
                error!(
                    filename = %request.filename,
                    staging_dir = %self.staging.dir().display(),
                    error = %e,
                    "Failed to stage download, letting it through"
                );
                return Interception::PassThrough;
            }
        };

        info!(
            filename = %request.filename,
            source_url = ?request.source_url,
            staged = %staged.path().display(),
            "Capturing download"
        );

        Interception::Captured(CaptureSession::begin(
            request.filename,
            request.source_url,
            request.referrer_url,
            staged,
            self.relay.clone(),
            self.processor.clone(),
            self.options.clone(),
        ))
    }

    /// Run [`CaptureSession::finish`] on its own thread so the caller never
    /// waits on the worker
    pub fn finish_detached(
        &self,
        session: CaptureSession,
        terminal: DownloadTerminal,
    ) -> io::Result<JoinHandle<SessionOutcome>> {
        thread::Builder::new()
            .name(format!("capture-{}", session.filename()))
            .spawn(move || session.finish(terminal))
    }
}

impl DownloadHook for CapturePipeline {
    fn on_download(&self, request: DownloadRequest) -> Interception {
        self.intercept(request)
    }
}
