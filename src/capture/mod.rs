//! Download capture
//!
//! Recognized downloads from the embedded browser are redirected into a
//! private staging directory, reported to the presentation layer as they
//! progress, handed to the worker once complete, and deleted afterwards no
//! matter how the session ended.
//!
//! - `staging` - unique staged paths and the owning `StagedFile` guard
//! - `session` - one download's state machine and its single terminal exit
//! - `pipeline` - extension filter, interception, detached completion

mod pipeline;
mod session;
mod staging;

pub use pipeline::{CapturePipeline, DownloadHook, DownloadRequest, Interception};
pub use session::{CaptureSession, DownloadTerminal, SessionOutcome, SessionState};
pub use staging::{StagedFile, StagingArea};

use serde_json::Value;

use crate::error::Result;
use crate::protocol::ProcessDownloadParams;
use crate::rpc::RpcClient;

/// Whatever turns a staged download into library parts.
///
/// Implementations only read `params.filepath`; the session owns the file.
pub trait ArtifactProcessor: Send + Sync {
    fn process_artifact(&self, params: ProcessDownloadParams) -> Result<Value>;
}

impl ArtifactProcessor for RpcClient {
    fn process_artifact(&self, params: ProcessDownloadParams) -> Result<Value> {
        self.process_download_params(&params)
    }
}

#[cfg(test)]
#[path = "../capture_tests.rs"]
mod tests;
