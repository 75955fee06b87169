//! Worker process supervision
//!
//! - `launch` - resolves the worker command line from config
//! - `process` - process-group termination with SIGTERM/SIGKILL escalation
//! - `stderr` - stderr forwarding into tracing plus a ring buffer
//! - `supervisor` - spawn, exit handling, and delayed restart
//!
//! Only exit code 0 is a clean exit. A non-zero code and a death by signal
//! (no exit code at all) are both crashes and get restarted after the delay.

mod launch;
mod process;
mod stderr;
mod supervisor;

pub use launch::WorkerLaunch;
pub use supervisor::{SupervisorOptions, WorkerState, WorkerSupervisor};

#[cfg(all(test, unix))]
#[path = "../worker_tests.rs"]
mod tests;
