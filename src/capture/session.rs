use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::staging::StagedFile;
use super::ArtifactProcessor;
use crate::error::BridgeError;
use crate::events::{EventRelay, HostEvent};
use crate::protocol::{ProcessDownloadParams, ProcessOptions, ProcessingResult, ProcessingStatus};

/// How the browser reported the end of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTerminal {
    Completed,
    Cancelled,
    Interrupted,
}

impl DownloadTerminal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Where a capture session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Started,
    Progressing,
    /// Download finished; processing not yet requested
    Completed,
    /// Download ended in any state other than completed
    Failed,
    Processing,
    Succeeded,
    Partial,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Succeeded | Self::Partial | Self::Errored
        )
    }
}

/// Terminal result of [`CaptureSession::finish`]
#[derive(Debug)]
pub enum SessionOutcome {
    /// The download never completed; no processing was requested
    CaptureFailed { state: String },
    /// The worker answered; `status` is None when the payload has no
    /// recognizable discriminator
    Processed {
        result: Value,
        status: Option<ProcessingStatus>,
    },
    /// The processing call failed
    ProcessingFailed { error: BridgeError },
}

/// One intercepted download, from `capture-started` to cleanup.
///
/// The staged file exists for the whole life of the session and is removed
/// as the last step of [`finish`](Self::finish), or on drop if the session
/// is abandoned.
pub struct CaptureSession {
    filename: String,
    source_url: Option<String>,
    referrer_url: Option<String>,
    staged: StagedFile,
    received: u64,
    total: u64,
    state: SessionState,
    relay: EventRelay,
    processor: Arc<dyn ArtifactProcessor>,
    options: ProcessOptions,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("filename", &self.filename)
            .field("staged", &self.staged.path())
            .field("state", &self.state)
            .field("received", &self.received)
            .field("total", &self.total)
            .finish()
    }
}

impl CaptureSession {
    pub(super) fn begin(
        filename: String,
        source_url: Option<String>,
        referrer_url: Option<String>,
        staged: StagedFile,
        relay: EventRelay,
        processor: Arc<dyn ArtifactProcessor>,
        options: ProcessOptions,
    ) -> Self {
        relay.emit(HostEvent::CaptureStarted {
            filename: filename.clone(),
            source_url: source_url.clone(),
        });
        Self {
            filename,
            source_url,
            referrer_url,
            staged,
            received: 0,
            total: 0,
            state: SessionState::Started,
            relay,
            processor,
            options,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Where the browser must write the download
    pub fn staged_path(&self) -> &Path {
        self.staged.path()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record a progress tick. Emits `capture-progress` unless paused and
    /// returns the percentage emitted.
    pub fn progress(&mut self, received: u64, total: u64, paused: bool) -> Option<u32> {
        if paused {
            return None;
        }
        self.received = received;
        self.total = total;
        self.state = SessionState::Progressing;

        let percent = percent_of(received, total);
        self.relay.emit(HostEvent::CaptureProgress {
            filename: self.filename.clone(),
            percent,
            received,
            total,
        });
        Some(percent)
    }

    /// Drive the session to its terminal state.
    ///
    /// Blocks on the processing call when the download completed; run it
    /// off the browser's event thread (see `CapturePipeline::finish_detached`).
    pub fn finish(mut self, terminal: DownloadTerminal) -> SessionOutcome {
        let outcome = if terminal == DownloadTerminal::Completed {
            self.process()
        } else {
            let state = terminal.as_str().to_string();
            let error = BridgeError::CaptureFailed {
                state: state.clone(),
            };
            warn!(filename = %self.filename, state = %state, "Download did not complete");
            self.state = SessionState::Failed;
            self.relay.emit(HostEvent::CaptureError {
                filename: self.filename.clone(),
                error: error.to_string(),
            });
            SessionOutcome::CaptureFailed { state }
        };

        self.staged.remove();
        outcome
    }

    fn process(&mut self) -> SessionOutcome {
        self.state = SessionState::Completed;
        self.relay.emit(HostEvent::CaptureComplete {
            filename: self.filename.clone(),
        });

        self.state = SessionState::Processing;
        self.relay.emit(HostEvent::ProcessingStarted {
            filename: self.filename.clone(),
        });

        let params = ProcessDownloadParams {
            filepath: self.staged.path().to_string_lossy().into_owned(),
            source_url: self.source_url.clone(),
            referrer_url: self.referrer_url.clone(),
            library_root: self.options.library_root.clone(),
            overwrite: self.options.overwrite,
        };

        match self.processor.process_artifact(params) {
            Ok(result) => {
                let status = ProcessingResult::from_value(&result).map(|r| r.status);
                self.state = match status {
                    Some(ProcessingStatus::Partial) => SessionState::Partial,
                    Some(ProcessingStatus::Error) => SessionState::Errored,
                    Some(ProcessingStatus::Success) | None => SessionState::Succeeded,
                };
                info!(filename = %self.filename, status = ?status, "Download processed");
                self.relay.emit(HostEvent::ProcessingComplete(result.clone()));
                SessionOutcome::Processed { result, status }
            }
            Err(error) => {
                warn!(filename = %self.filename, error = %error, "Processing failed");
                self.state = SessionState::Errored;
                self.relay.emit(HostEvent::ProcessingError {
                    filename: self.filename.clone(),
                    error: error.to_string(),
                });
                SessionOutcome::ProcessingFailed { error }
            }
        }
    }
}

/// `round(received / total * 100)`, or 0 when the total is unknown
fn percent_of(received: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (received as f64 / total as f64 * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(512, 0), 0);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
        assert_eq!(percent_of(1234, 1234), 100);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Partial.is_terminal());
        assert!(!SessionState::Processing.is_terminal());
        assert_eq!(DownloadTerminal::Cancelled.as_str(), "cancelled");
    }
}
