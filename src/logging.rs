//! Structured JSONL logging to a file plus human-readable stderr output.
//!
//! - **JSONL to file** (~/.partbridge/logs/partbridge.jsonl) for post-mortem parsing
//! - **Pretty to stderr** for developers running the host from a terminal
//!
//! # Usage
//!
//! ```rust,ignore
//! use partbridge::logging;
//!
//! // Initialize logging - MUST keep guard alive for duration of program
//! let _guard = logging::init();
//!
//! tracing::info!(event_type = "worker_lifecycle", "Worker started");
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Maximum length for raw protocol lines in logs
const MAX_PROTOCOL_PREVIEW: usize = 200;

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
/// If the log file cannot be opened, only the stderr layer is installed.
pub fn init() -> LoggingGuard {
    let log_dir = get_log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }

    let log_path = log_dir.join("partbridge.jsonl");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Pretty layer for stderr (human developers)
    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    let file = OpenOptions::new().create(true).append(true).open(&log_path);

    // No JSON layer when the log file could not be opened
    let (json_layer, file_guard, open_error) = match file {
        Ok(file) => {
            let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file);

            let json_layer = fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_span_events(FmtSpan::NONE);

            (Some(json_layer), Some(file_guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .init();

    match open_error {
        None => tracing::info!(
            event_type = "app_lifecycle",
            action = "started",
            log_path = %log_path.display(),
            "Application logging initialized"
        ),
        Some(e) => tracing::warn!(
            error = %e,
            log_path = %log_path.display(),
            "Failed to open log file, logging to stderr only"
        ),
    }

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Get the log directory path (~/.partbridge/logs/)
fn get_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".partbridge").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("partbridge-logs"))
}

/// Get the path to the JSONL log file
pub fn log_path() -> PathBuf {
    get_log_dir().join("partbridge.jsonl")
}

/// Get a truncated preview of a raw protocol line for logging.
///
/// Returns the preview and the original length. Truncation respects UTF-8
/// character boundaries.
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len <= MAX_PROTOCOL_PREVIEW {
        return (raw, len);
    }
    let mut end = MAX_PROTOCOL_PREVIEW;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    (&raw[..end], len)
}

/// Log an outbound request line
pub fn log_protocol_send(id: u64, method: &str, json: &str) {
    let (preview, raw_len) = log_preview(json);
    tracing::debug!(
        event_type = "protocol",
        direction = "send",
        id = id,
        method = method,
        raw_len = raw_len,
        raw_preview = %preview,
        "-> {} #{}", method, id
    );
}

/// Log an inbound response matched to its call
pub fn log_protocol_recv(id: u64, method: &str, is_error: bool, elapsed_ms: u64) {
    tracing::debug!(
        event_type = "protocol",
        direction = "recv",
        id = id,
        method = method,
        is_error = is_error,
        elapsed_ms = elapsed_ms,
        "<- {} #{}", method, id
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_preview_truncation() {
        let short = "hello";
        let (preview, len) = log_preview(short);
        assert_eq!(preview, "hello");
        assert_eq!(len, 5);

        let long = "a".repeat(500);
        let (preview, len) = log_preview(&long);
        assert_eq!(preview.len(), 200);
        assert_eq!(len, 500);
    }

    #[test]
    fn test_log_preview_respects_char_boundaries() {
        // 'é' is two bytes, so byte 200 falls inside a character
        let long = format!("a{}", "é".repeat(200));
        let (preview, len) = log_preview(&long);
        assert_eq!(len, long.len());
        assert!(preview.len() <= 200);
        assert!(long.starts_with(preview));
    }

    #[test]
    fn test_log_path_file_name() {
        assert!(log_path().ends_with("partbridge.jsonl"));
    }

    #[test]
    fn test_init_installs_subscriber() {
        // Only test in this binary that installs the global subscriber
        let _guard = init();
        tracing::info!(event_type = "test", "subscriber installed");
    }
}
