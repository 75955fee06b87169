//! Request and response envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request written to the worker's stdin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Correlation id, unique for the lifetime of the host process
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq)]
pub struct RpcErrorObject {
    pub message: String,
    pub code: Option<i64>,
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Build from whatever the worker put in the `error` field.
    ///
    /// Objects contribute `message`, `code` and `data`; a bare string is used
    /// as the message; anything else is rendered as JSON text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let message = match map.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => "Unknown worker error".to_string(),
                };
                let code = map.get("code").and_then(Value::as_i64);
                let data = map.remove("data");
                Self {
                    message,
                    code,
                    data,
                }
            }
            Value::String(message) => Self {
                message,
                code: None,
                data: None,
            },
            other => Self {
                message: other.to_string(),
                code: None,
                data: None,
            },
        }
    }
}

/// Inbound response read from the worker's stdout
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub result: Value,
    /// Present when the worker reported a failure; takes precedence over `result`
    pub error: Option<RpcErrorObject>,
}

impl Response {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the call outcome seen by the caller
    pub fn into_result(self) -> Result<Value, BridgeError> {
        match self.error {
            Some(err) => Err(BridgeError::WorkerReported {
                message: err.message,
                code: err.code,
                data: err.data,
            }),
            None => Ok(self.result),
        }
    }
}
