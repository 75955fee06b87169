//! PartBridge - host side of the part library bridge
//!
//! This library supervises the library worker process, talks JSON-RPC to it
//! over stdio, captures component downloads from the embedded browser and
//! relays progress events to the presentation layer.

pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod rpc;
pub mod worker;
