use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, instrument, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use super::launch::WorkerLaunch;
use super::process::ProcessHandle;
use super::stderr::{spawn_stderr_forwarder, StderrBuffer};
use crate::config::{WorkerConfig, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_RESTART_DELAY_MS};
use crate::error::{BridgeError, Result};
use crate::rpc::RpcClient;

/// How often the monitor polls the child for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long the monitor lets the stdout reader drain after exit
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);
/// Number of stderr lines included in the exit log
const EXIT_STDERR_TAIL: usize = 10;

/// Lifecycle of the supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Never started, stopped explicitly, or exited cleanly
    Stopped,
    /// Spawn in progress
    Starting,
    /// Process live and transport attached
    Running,
    /// Exited unexpectedly; a restart is scheduled
    Exited,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub restart_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

/// One spawned worker process
struct LiveWorker {
    generation: u64,
    child: Arc<Mutex<Child>>,
    handle: ProcessHandle,
    stop_requested: Arc<AtomicBool>,
}

impl LiveWorker {
    fn kill(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.handle.terminate();
        // Reaches the leader on platforms without process groups
        let _ = self.child.lock().kill();
    }
}

struct SupervisorState {
    worker: WorkerState,
    generation: u64,
    current: Option<LiveWorker>,
    monitor: Option<JoinHandle<()>>,
}

struct Inner {
    launch: WorkerLaunch,
    restart_delay: Duration,
    client: Arc<RpcClient>,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    state: Mutex<SupervisorState>,
    state_changed: Condvar,
    stderr: StderrBuffer,
}

/// Owns the worker process: spawns it, watches it, restarts it after an
/// unexpected exit, and stops it on request or on drop.
///
/// Calls go through [`WorkerSupervisor::client`], which stays valid across
/// restarts.
pub struct WorkerSupervisor {
    inner: Arc<Inner>,
}

impl WorkerSupervisor {
    pub fn new(launch: WorkerLaunch, options: SupervisorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                launch,
                restart_delay: options.restart_delay,
                client: Arc::new(RpcClient::new(options.call_timeout)),
                lifecycle: Mutex::new(()),
                state: Mutex::new(SupervisorState {
                    worker: WorkerState::Stopped,
                    generation: 0,
                    current: None,
                    monitor: None,
                }),
                state_changed: Condvar::new(),
                stderr: StderrBuffer::default(),
            }),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            WorkerLaunch::resolve(config),
            SupervisorOptions {
                restart_delay: config.restart_delay(),
                call_timeout: config.call_timeout(),
            },
        )
    }

    /// The RPC client bound to whichever worker generation is live
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.inner.client
    }

    /// Spawn the worker, replacing any live one.
    ///
    /// Returns the new generation number.
    pub fn start(&self) -> Result<u64> {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.start_locked()
    }

    /// Stop the worker. No restart follows.
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.shutdown_current();
        let mut state = self.inner.state.lock();
        if state.worker != WorkerState::Stopped {
            info!(generation = state.generation, "Worker stopped");
        }
        state.worker = WorkerState::Stopped;
        self.inner.state_changed.notify_all();
    }

    pub fn state(&self) -> WorkerState {
        self.inner.state.lock().worker
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Number of spawns so far
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .map(|live| live.handle.pid())
    }

    /// Most recent worker stderr output, across restarts
    pub fn recent_stderr(&self) -> String {
        self.inner.stderr.contents()
    }

    /// Block until the worker reaches `target`. Returns false on timeout.
    pub fn wait_for_state(&self, target: WorkerState, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.worker == target)
    }

    /// Block until generation `generation` or later is running
    pub fn wait_for_generation(&self, generation: u64, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.generation >= generation && state.worker == WorkerState::Running
        })
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&SupervisorState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !done(&state) {
            if self
                .inner
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return done(&state);
            }
        }
        true
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn set_worker_state(&self, generation: u64, worker: WorkerState) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.worker = worker;
            self.state_changed.notify_all();
        }
    }

    /// Stop the live worker (if any) as an expected exit and join its monitor
    fn shutdown_current(&self) {
        let (current, monitor) = {
            let mut state = self.state.lock();
            (state.current.take(), state.monitor.take())
        };

        if let Some(mut live) = current {
            debug!(generation = live.generation, "Stopping worker");
            live.kill();
            self.client.detach(live.generation);
        }

        if let Some(monitor) = monitor {
            if monitor.join().is_err() {
                warn!("Worker monitor thread panicked");
            }
        }
    }

    /// Caller holds the lifecycle lock
    #[instrument(skip_all)]
    fn start_locked(self: &Arc<Self>) -> Result<u64> {
        self.shutdown_current();

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.worker = WorkerState::Starting;
            self.state_changed.notify_all();
            state.generation
        };

        let mut command = Command::new(&self.launch.program);
        command
            .args(&self.launch.args)
            .envs(&self.launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so stop() reaches the worker's children too
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(generation, error = %e, "Worker spawn failed");
                self.set_worker_state(generation, WorkerState::Stopped);
                return Err(BridgeError::Spawn(format!(
                    "{}: {}",
                    self.launch.program.display(),
                    e
                )));
            }
        };

        let pid = child.id();
        let (stdin, stdout, stderr) = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let mut live = LiveWorker {
            generation,
            child: Arc::new(Mutex::new(child)),
            handle: ProcessHandle::new(pid, generation),
            stop_requested: Arc::new(AtomicBool::new(false)),
        };

        match self.attach(&live, stdin, stdout, stderr) {
            Ok(reader) => {
                let child = live.child.clone();
                let stop_requested = live.stop_requested.clone();
                {
                    let mut state = self.state.lock();
                    state.worker = WorkerState::Running;
                    state.current = Some(live);
                    self.state_changed.notify_all();
                }
                info!(generation, pid, "Worker started");

                let watch = ExitWatch {
                    inner: Arc::downgrade(self),
                    generation,
                    reader,
                };
                match thread::Builder::new()
                    .name(format!("worker-monitor-{}", generation))
                    .spawn(move || watch.run(child, stop_requested))
                {
                    Ok(handle) => {
                        self.state.lock().monitor = Some(handle);
                        Ok(generation)
                    }
                    Err(e) => {
                        error!(generation, error = %e, "Failed to spawn worker monitor");
                        self.shutdown_current();
                        self.set_worker_state(generation, WorkerState::Stopped);
                        Err(BridgeError::Spawn(format!("monitor thread: {}", e)))
                    }
                }
            }
            Err(e) => {
                error!(generation, error = %e, "Failed to attach worker stdio");
                live.kill();
                self.client.detach(generation);
                self.set_worker_state(generation, WorkerState::Stopped);
                Err(e)
            }
        }
    }

    /// Hand stdin to the client and start the stdout reader and stderr
    /// forwarder. Returns the reader's handle.
    fn attach(
        &self,
        live: &LiveWorker,
        stdin: Option<std::process::ChildStdin>,
        stdout: Option<std::process::ChildStdout>,
        stderr: Option<std::process::ChildStderr>,
    ) -> Result<JoinHandle<()>> {
        let generation = live.generation;
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(BridgeError::Spawn("worker stdio was not piped".to_string()));
        };

        self.client.attach(generation, Box::new(stdin))?;

        let client = self.client.clone();
        let reader = thread::Builder::new()
            .name(format!("worker-stdout-{}", generation))
            .spawn(move || client.read_responses(stdout, generation))?;

        if let Some(stderr) = stderr {
            spawn_stderr_forwarder(stderr, generation, self.stderr.clone())?;
        }

        Ok(reader)
    }
}

/// Per-generation exit handling, run on the monitor thread
struct ExitWatch {
    inner: Weak<Inner>,
    generation: u64,
    reader: JoinHandle<()>,
}

impl ExitWatch {
    fn run(self, child: Arc<Mutex<Child>>, stop_requested: Arc<AtomicBool>) {
        let generation = self.generation;
        let status = wait_for_exit(&child, generation);
        let code = status.and_then(|s| s.code());

        // Let the reader deliver responses written just before exit
        let drain_start = Instant::now();
        while !self.reader.is_finished() && drain_start.elapsed() < READER_DRAIN_GRACE {
            thread::sleep(Duration::from_millis(10));
        }

        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        inner.client.detach(generation);
        let failed = inner
            .client
            .fail_all(|| BridgeError::WorkerExited { code });

        let explicit = stop_requested.load(Ordering::SeqCst);
        let clean = status.is_some_and(|s| s.success());
        let restart = !explicit && !clean;

        let tail = inner.stderr.last_lines(EXIT_STDERR_TAIL).join("\n");
        if restart {
            warn!(
                generation,
                code = ?code,
                failed_calls = failed,
                stderr_tail = %tail,
                restart_delay_ms = inner.restart_delay.as_millis() as u64,
                "Worker exited unexpectedly, scheduling restart"
            );
        } else {
            info!(generation, code = ?code, explicit, failed_calls = failed, "Worker exited");
        }

        let finished = {
            let mut state = inner.state.lock();
            if state.generation != generation {
                return;
            }
            state.worker = if restart {
                WorkerState::Exited
            } else {
                WorkerState::Stopped
            };
            inner.state_changed.notify_all();
            state.current.take()
        };
        // Reaps any leftover group members
        drop(finished);

        if restart {
            schedule_restart(Arc::downgrade(&inner), generation, inner.restart_delay);
        }
    }
}

fn wait_for_exit(child: &Mutex<Child>, generation: u64) -> Option<ExitStatus> {
    loop {
        match child.lock().try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                warn!(generation, error = %e, "Failed to poll worker status");
                return None;
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

/// Start a new generation after `delay`, unless `stop()` or another
/// `start()` happened in the meantime.
fn schedule_restart(inner: Weak<Inner>, exited_generation: u64, delay: Duration) {
    let spawned = thread::Builder::new()
        .name(format!("worker-restart-{}", exited_generation))
        .spawn(move || {
            thread::sleep(delay);
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let _lifecycle = inner.lifecycle.lock();
            {
                let state = inner.state.lock();
                if state.generation != exited_generation || state.worker != WorkerState::Exited {
                    debug!(exited_generation, "Restart abandoned");
                    return;
                }
            }
            match inner.start_locked() {
                Ok(generation) => info!(generation, "Worker restarted"),
                Err(e) => error!(error = %e, "Worker restart failed"),
            }
        });

    if let Err(e) = spawned {
        error!(error = %e, "Failed to schedule worker restart");
    }
}
