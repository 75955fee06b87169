//! Correlated request/response calls to the worker
//!
//! `RpcClient` owns the correlation table. The supervisor attaches the
//! current worker's stdin as the outbound transport and feeds the worker's
//! stdout through `read_responses`; callers block only their own thread
//! until the response, the deadline, or the worker's exit.

mod client;

pub use client::{RpcClient, DEFAULT_CALL_TIMEOUT};

#[cfg(test)]
#[path = "../rpc_tests.rs"]
mod tests;
