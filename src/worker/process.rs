//! Process-group control for the worker
//!
//! The worker is spawned as the leader of its own process group so that
//! stopping it also takes down anything it spawned.

use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

use tracing::{debug, info, warn};

#[cfg_attr(not(unix), allow(dead_code))]
/// Grace period after SIGTERM before escalating to SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(250);
#[cfg_attr(not(unix), allow(dead_code))]
/// How often to check the group during the grace period
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(unix)]
mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Send a signal to a process group (negative PID targets the group)
    pub fn signal_group(pgid: u32, signal: c_int) -> std::io::Result<()> {
        // Safety: kill() is a plain syscall with no memory safety concerns
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    /// True while any process in the group exists.
    ///
    /// EPERM still means the group exists.
    pub fn group_alive(pgid: u32) -> bool {
        // Safety: signal 0 only checks existence
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() != Some(ESRCH)
    }

    pub fn is_no_such_group(err: &std::io::Error) -> bool {
        err.raw_os_error() == Some(ESRCH)
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

/// Tracks a worker's pid so its group can be terminated even after the
/// `Child` has moved to the monitor thread.
///
/// Dropping the handle terminates the group.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    generation: u64,
    terminated: bool,
}

impl ProcessHandle {
    pub fn new(pid: u32, generation: u64) -> Self {
        debug!(pid, generation, "Tracking worker process group");
        Self {
            pid,
            generation,
            terminated: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminate the process group: SIGTERM, wait up to 250ms, then SIGKILL.
    ///
    /// Idempotent. On non-Unix platforms this only marks the handle; the
    /// caller kills the `Child` directly.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        #[cfg(unix)]
        {
            use unix_process::{group_alive, is_no_such_group, signal_group, SIGKILL, SIGTERM};

            // Spawned with process_group(0), so the PGID equals the PID
            let pgid = self.pid;

            match signal_group(pgid, SIGTERM) {
                Ok(()) => debug!(pgid, generation = self.generation, "SIGTERM sent"),
                Err(e) if is_no_such_group(&e) => {
                    debug!(pgid, "Worker process group already exited");
                    return;
                }
                Err(e) => warn!(pgid, error = %e, "Failed to send SIGTERM"),
            }

            let start = Instant::now();
            while start.elapsed() < TERM_GRACE {
                if !group_alive(pgid) {
                    info!(pgid, generation = self.generation, "Worker terminated after SIGTERM");
                    return;
                }
                std::thread::sleep(POLL_INTERVAL);
            }

            warn!(
                pgid,
                grace_ms = TERM_GRACE.as_millis() as u64,
                "Worker ignored SIGTERM, escalating to SIGKILL"
            );
            match signal_group(pgid, SIGKILL) {
                Ok(()) => info!(pgid, "Worker process group killed"),
                Err(e) if is_no_such_group(&e) => {
                    debug!(pgid, "Worker process group exited just before SIGKILL")
                }
                Err(e) => warn!(pgid, error = %e, "SIGKILL failed"),
            }
        }

        #[cfg(not(unix))]
        {
            debug!(pid = self.pid, "Process group control unavailable on this platform");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
