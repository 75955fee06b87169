//! partbridge - drive the library worker from a terminal
//!
//! Every subcommand starts the worker under supervision, runs, and stops it
//! again. Events and replies are printed to stdout as JSON lines; logs go to
//! stderr and the log file.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};

use partbridge::capture::{
    CapturePipeline, CaptureSession, DownloadHook, DownloadRequest, DownloadTerminal,
    Interception, SessionOutcome,
};
use partbridge::commands::{spawn_command_listener, CommandRouter, HeadlessShell};
use partbridge::config::{self, Config};
use partbridge::error::BridgeError;
use partbridge::events::{EventRelay, HostEvent};
use partbridge::logging;
use partbridge::protocol::{ListOptions, SearchOptions};
use partbridge::worker::WorkerSupervisor;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "partbridge")]
#[command(about = "Capture component downloads into a KiCad part library")]
#[command(version)]
struct Args {
    /// Config file (defaults to $PARTBRIDGE_CONFIG or ~/.partbridge/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the worker starts and answers
    Ping,
    /// List components in the library
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        /// Library root (overrides the configured one)
        #[arg(long)]
        root: Option<String>,
    },
    /// Search the library
    Search {
        query: String,
        #[arg(long)]
        root: Option<String>,
    },
    /// Feed a local archive through the capture pipeline as if it had been
    /// downloaded
    Import {
        file: PathBuf,
        #[arg(long)]
        source_url: Option<String>,
        #[arg(long)]
        referrer_url: Option<String>,
    },
    /// Execute JSONL host commands from stdin until EOF
    Watch,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logging::init();

    let config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    let supervisor = WorkerSupervisor::from_config(&config.worker);
    let generation = supervisor.start().context("failed to start the worker")?;
    info!(generation, pid = ?supervisor.pid(), "Worker started");

    let result = run(args.command, &config, &supervisor);
    if let Err(e) = &result {
        let unavailable = e
            .downcast_ref::<BridgeError>()
            .is_some_and(BridgeError::is_worker_unavailable);
        let stderr = supervisor.recent_stderr();
        if unavailable && !stderr.is_empty() {
            eprintln!("Recent worker stderr:\n{}", stderr);
        }
    }
    supervisor.stop();
    result
}

fn run(command: Command, config: &Config, supervisor: &WorkerSupervisor) -> Result<()> {
    let client = supervisor.client();
    match command {
        Command::Ping => print_json(&client.ping()?),
        Command::List {
            limit,
            offset,
            root,
        } => {
            let options = ListOptions {
                library_root: root.or_else(|| config.library_root()),
                limit,
                offset,
            };
            print_json(&client.list_components(options)?)
        }
        Command::Search { query, root } => {
            let options = SearchOptions {
                library_root: root.or_else(|| config.library_root()),
            };
            print_json(&client.search_components(&query, options)?)
        }
        Command::Import {
            file,
            source_url,
            referrer_url,
        } => import(config, supervisor, &file, source_url, referrer_url),
        Command::Watch => watch(supervisor),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print every relayed event as one JSON line until all senders are gone
fn spawn_event_printer(events: async_channel::Receiver<HostEvent>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            while let Ok(event) = events.recv_blocking() {
                match serde_json::to_string(&event) {
                    Ok(line) => {
                        let mut out = io::stdout().lock();
                        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, channel = event.channel(), "Failed to encode event"),
                }
            }
        })
}

fn import(
    config: &Config,
    supervisor: &WorkerSupervisor,
    file: &Path,
    source_url: Option<String>,
    referrer_url: Option<String>,
) -> Result<()> {
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", file.display()))?;

    let relay = EventRelay::new();
    let printer = spawn_event_printer(relay.subscribe())?;
    let pipeline = CapturePipeline::from_config(config, supervisor.client().clone(), relay);

    let hook: &dyn DownloadHook = &pipeline;
    let mut session = match hook.on_download(DownloadRequest {
        filename: filename.clone(),
        source_url,
        referrer_url,
    }) {
        Interception::Captured(session) => session,
        Interception::PassThrough => bail!(
            "{} was not captured (unrecognized extension or staging unavailable)",
            filename
        ),
    };

    let terminal = match copy_with_progress(file, &mut session) {
        Ok(()) => DownloadTerminal::Completed,
        Err(e) => {
            warn!(error = %e, file = %file.display(), "Copy into staging failed");
            DownloadTerminal::Interrupted
        }
    };

    let outcome = pipeline
        .finish_detached(session, terminal)?
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))?;

    // Closes the relay so the printer drains and exits
    drop(pipeline);
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }

    match outcome {
        SessionOutcome::Processed { .. } => Ok(()),
        SessionOutcome::CaptureFailed { state } => bail!("Download {}", state),
        SessionOutcome::ProcessingFailed { error } => Err(error.into()),
    }
}

/// Stand in for the browser: write `source` into the staged path, reporting
/// progress per chunk
fn copy_with_progress(source: &Path, session: &mut CaptureSession) -> io::Result<()> {
    let mut input = File::open(source)?;
    let total = input.metadata()?.len();
    let mut output = File::create(session.staged_path())?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut received = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
        received += n as u64;
        session.progress(received, total, false);
    }
    output.flush()?;

    if received == 0 {
        session.progress(0, total, false);
    }
    Ok(())
}

fn watch(supervisor: &WorkerSupervisor) -> Result<()> {
    let relay = EventRelay::new();
    let printer = spawn_event_printer(relay.subscribe())?;
    let mut router = CommandRouter::new(HeadlessShell::new(relay), supervisor.client().clone());
    let commands = spawn_command_listener(BufReader::new(io::stdin()))?;

    info!("Reading host commands from stdin");
    while let Ok(command) = commands.recv_blocking() {
        let kind = serde_json::to_value(&command)?
            .get("type")
            .cloned()
            .unwrap_or(Value::Null);
        let reply = match router.dispatch(command) {
            Ok(result) => json!({ "type": kind, "result": result }),
            Err(e) => json!({
                "type": kind,
                "error": { "message": e.to_string(), "userMessage": e.user_message() },
            }),
        };
        println!("{}", reply);
    }
    info!("stdin closed, shutting down");

    drop(router);
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }
    Ok(())
}
