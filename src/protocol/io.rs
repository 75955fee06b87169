//! Protocol I/O for JSONL framing
//!
//! This module provides:
//! - `encode_request` for serializing a request to a single line
//! - `decode_response` for classifying one line read from the worker
//! - `ResponseReader` for streaming responses off the worker's stdout

use std::io::{BufRead, BufReader, Read};

use serde_json::Value;
use tracing::{debug, warn};

use super::message::{Request, Response, RpcErrorObject};
use crate::logging::log_preview;

/// Serialize a request to JSONL format (without the trailing newline)
pub fn encode_request(request: &Request) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

/// Result of decoding one line from the worker
#[derive(Debug)]
pub enum DecodeResult {
    /// A response that can be matched against a pending call
    Response(Response),
    /// Valid JSON object with no `id` (worker chatter, not a response)
    Notification {
        /// Truncated raw JSON for debugging
        raw: String,
    },
    /// `id` present but not a non-negative integer
    InvalidId {
        /// Truncated raw JSON for debugging
        raw: String,
    },
    /// Valid JSON that is not an object
    NotAnObject {
        /// Truncated raw JSON for debugging
        raw: String,
    },
    /// JSON parsing failed entirely (syntax error)
    ParseError(serde_json::Error),
}

/// Decode a response line.
///
/// Parses to `serde_json::Value` once and classifies from there. A
/// response carrying an `error` field that is non-null is a failure, even if
/// it also carries `result`.
pub fn decode_response(line: &str) -> DecodeResult {
    let (preview, _raw_len) = log_preview(line);

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return DecodeResult::ParseError(e),
    };

    let Value::Object(mut map) = value else {
        return DecodeResult::NotAnObject {
            raw: preview.to_string(),
        };
    };

    let id = match map.get("id") {
        None | Some(Value::Null) => {
            return DecodeResult::Notification {
                raw: preview.to_string(),
            }
        }
        Some(id) => match id.as_u64() {
            Some(id) => id,
            None => {
                return DecodeResult::InvalidId {
                    raw: preview.to_string(),
                }
            }
        },
    };

    let error = match map.remove("error") {
        None | Some(Value::Null) => None,
        Some(err) => Some(RpcErrorObject::from_value(err)),
    };
    let result = map.remove("result").unwrap_or(Value::Null);

    DecodeResult::Response(Response { id, result, error })
}

/// Streaming reader of responses from the worker's stdout.
///
/// Malformed lines are logged and skipped; they can never be correlated to a
/// pending call so they are not surfaced to callers.
///
/// Lines are read as raw bytes; a line that is not valid UTF-8 is skipped
/// like any other malformed line.
pub struct ResponseReader<R: Read> {
    reader: BufReader<R>,
    line_buffer: Vec<u8>,
}

impl<R: Read> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        ResponseReader {
            reader: BufReader::new(reader),
            line_buffer: Vec::with_capacity(1024),
        }
    }

    /// Read the next well-formed response
    ///
    /// # Returns
    /// * `Ok(Some(Response))` - Successfully decoded response
    /// * `Ok(None)` - End of stream
    /// * `Err(e)` - IO error
    pub fn next_response(&mut self) -> Result<Option<Response>, std::io::Error> {
        loop {
            self.line_buffer.clear();
            if self.reader.read_until(b'\n', &mut self.line_buffer)? == 0 {
                debug!("Reached end of worker stdout");
                return Ok(None);
            }

            let line = match std::str::from_utf8(&self.line_buffer) {
                Ok(line) => line,
                Err(e) => {
                    let lossy = String::from_utf8_lossy(&self.line_buffer);
                    let (preview, raw_len) = log_preview(lossy.trim());
                    warn!(
                        error = %e,
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Skipping line that is not valid UTF-8"
                    );
                    continue;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (preview, raw_len) = log_preview(trimmed);

            match decode_response(trimmed) {
                DecodeResult::Response(response) => return Ok(Some(response)),
                DecodeResult::Notification { .. } => {
                    debug!(
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Skipping worker message without id"
                    );
                }
                DecodeResult::InvalidId { .. } => {
                    warn!(
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Skipping response with non-integer id"
                    );
                }
                DecodeResult::NotAnObject { .. } => {
                    warn!(
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Skipping non-object JSON line"
                    );
                }
                DecodeResult::ParseError(e) => {
                    warn!(
                        error = %e,
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Failed to parse response"
                    );
                }
            }
        }
    }
}
