//! JSON-RPC over JSONL between the host and the worker process
//!
//! Requests are written to the worker's stdin and responses read from its
//! stdout, one JSON object per line:
//!
//! - Request: `{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}`
//! - Success: `{"id":1,"result":"pong"}`
//! - Error: `{"id":1,"error":{"code":-32000,"message":"unsupported format"}}`
//!
//! # Module Structure
//!
//! - `message`: request/response envelopes
//! - `types`: the method catalogue and typed params/results
//! - `io`: line encoding, graceful decoding, streaming response reader

mod io;
mod message;
mod types;

pub use io::*;
pub use message::*;
pub use types::*;
