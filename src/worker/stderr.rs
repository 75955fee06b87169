//! Worker stderr ring buffer
//!
//! Every stderr line is forwarded to tracing as it arrives and also kept in
//! a bounded buffer so the most recent output can be reported after the
//! worker dies.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Default maximum number of lines to buffer
pub const DEFAULT_MAX_LINES: usize = 500;

/// Default maximum total bytes to buffer (4KB)
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024;

#[derive(Debug, Default)]
struct Lines {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Thread-safe ring buffer for stderr lines. Clones share the same data.
#[derive(Debug, Clone)]
pub struct StderrBuffer {
    inner: Arc<Mutex<Lines>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for StderrBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl StderrBuffer {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lines::default())),
            max_lines,
            max_bytes,
        }
    }

    /// Add a line, evicting the oldest lines past either limit
    pub fn push_line(&self, line: String) {
        let mut inner = self.inner.lock();

        while inner.bytes + line.len() > self.max_bytes || inner.lines.len() >= self.max_lines {
            match inner.lines.pop_front() {
                Some(old) => inner.bytes = inner.bytes.saturating_sub(old.len()),
                None => break,
            }
        }

        inner.bytes += line.len();
        inner.lines.push_back(line);
    }

    /// All buffered lines joined with newlines
    pub fn contents(&self) -> String {
        let inner = self.inner.lock();
        inner.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// The last `n` lines, oldest first
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let inner = self.inner.lock();
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }
}

/// Spawn a thread that tees the worker's stderr into tracing and `buffer`.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the
/// stream. The thread ends when the stream closes.
pub fn spawn_stderr_forwarder<R: Read + Send + 'static>(
    stderr: R,
    generation: u64,
    buffer: StderrBuffer,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-stderr-{}", generation))
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                        info!(target: "worker", generation, "{}", line);
                        buffer.push_line(line);
                    }
                    Err(e) => {
                        warn!(target: "worker", generation, error = %e, "stderr read error");
                        break;
                    }
                }
            }
            debug!(target: "worker", generation, "stderr forwarder exiting");
        })
}
