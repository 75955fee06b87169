use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

/// Error severity for presentation-layer display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // informational
    Warning,  // recoverable, the user may retry
    Error,    // operation failed
    Critical, // the bridge itself is unusable
}

/// Errors raised by the worker bridge and the capture pipeline
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No worker is attached, or writing the request failed
    #[error("Worker process not running: {0}")]
    TransportUnavailable(String),

    /// The worker answered with an `error` object; `message` is verbatim
    #[error("{message}")]
    WorkerReported {
        message: String,
        code: Option<i64>,
        data: Option<serde_json::Value>,
    },

    #[error("JSON-RPC timeout for {method} after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("Worker process exited ({})", exit_code_label(.code))]
    WorkerExited { code: Option<i32> },

    #[error("Download {state}")]
    CaptureFailed { state: String },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode protocol message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "killed by signal".to_string(),
    }
}

impl BridgeError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::TransportUnavailable(_) => ErrorSeverity::Error,
            Self::WorkerReported { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Error,
            Self::WorkerExited { .. } => ErrorSeverity::Error,
            Self::CaptureFailed { .. } => ErrorSeverity::Warning,
            Self::Spawn(_) => ErrorSeverity::Critical,
            Self::Io(_) => ErrorSeverity::Error,
            Self::Protocol(_) => ErrorSeverity::Warning,
            Self::Config(_) => ErrorSeverity::Warning,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::TransportUnavailable(_) => "The processing worker is not running".to_string(),
            Self::WorkerReported { message, .. } => message.clone(),
            Self::Timeout { method, .. } => format!("The worker did not answer {} in time", method),
            Self::WorkerExited { .. } => "The processing worker stopped unexpectedly".to_string(),
            Self::CaptureFailed { state } => format!("Download {}", state),
            Self::Spawn(msg) => format!("Could not start the processing worker: {}", msg),
            Self::Io(e) => format!("File system error: {}", e),
            Self::Protocol(e) => format!("Invalid message format: {}", e),
            Self::Config(msg) => format!("Configuration issue: {}", msg),
        }
    }

    /// True for failures caused by the worker going away rather than by the request
    pub fn is_worker_unavailable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_) | Self::WorkerExited { .. } | Self::Spawn(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the user doesn't need to know.
///
/// # Examples
///
/// ```ignore
/// use partbridge::error::ResultExt;
///
/// // Staging cleanup failures are logged and otherwise ignored
/// std::fs::remove_file(&path).warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_reported_message_is_verbatim() {
        let err = BridgeError::WorkerReported {
            message: "unsupported format".to_string(),
            code: Some(-32000),
            data: None,
        };
        assert_eq!(err.to_string(), "unsupported format");
        assert_eq!(err.user_message(), "unsupported format");
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_worker_exited_display() {
        let err = BridgeError::WorkerExited { code: Some(3) };
        assert_eq!(err.to_string(), "Worker process exited (code 3)");

        let err = BridgeError::WorkerExited { code: None };
        assert_eq!(err.to_string(), "Worker process exited (killed by signal)");
        assert!(err.is_worker_unavailable());
    }

    #[test]
    fn test_timeout_display_names_method() {
        let err = BridgeError::Timeout {
            method: "process_download".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "JSON-RPC timeout for process_download after 1500ms"
        );
        assert!(!err.is_worker_unavailable());
    }

    #[test]
    fn test_capture_failed_display() {
        let err = BridgeError::CaptureFailed {
            state: "cancelled".to_string(),
        };
        assert_eq!(err.to_string(), "Download cancelled");
    }

    #[test]
    fn test_result_ext_returns_value_or_none() {
        let ok: std::result::Result<u8, String> = Ok(7);
        assert_eq!(ok.warn_on_err(), Some(7));

        let err: std::result::Result<u8, String> = Err("boom".to_string());
        assert_eq!(err.log_err(), None);
    }
}
