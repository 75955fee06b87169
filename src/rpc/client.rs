use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::DEFAULT_CALL_TIMEOUT_MS;
use crate::error::{BridgeError, Result};
use crate::logging;
use crate::protocol::{
    encode_request, ListComponentsParams, ListOptions, Method, ProcessDownloadParams,
    ProcessOptions, Request, Response, ResponseReader, SearchComponentsParams, SearchOptions,
};

/// Default per-call deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS);

type CallResult = Result<Value>;

type PendingTable = Mutex<HashMap<u64, PendingCall>>;

/// An in-flight request awaiting its response
struct PendingCall {
    method: String,
    generation: u64,
    issued_at: Instant,
    /// One-shot completion slot; capacity 1 so completing never blocks
    slot: SyncSender<CallResult>,
}

/// One encoded request queued for the worker's stdin
struct Outbound {
    id: u64,
    line: String,
}

/// Outbound half of the transport: the queue feeding the current worker's
/// stdin writer thread
struct Transport {
    generation: u64,
    queue: Sender<Outbound>,
}

/// JSON-RPC client over the worker's stdio.
///
/// Thread-safe: any number of threads may have calls outstanding at once.
pub struct RpcClient {
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    transport: Mutex<Option<Transport>>,
    default_timeout: Duration,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl RpcClient {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            transport: Mutex::new(None),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Attach the stdin of worker `generation` as the outbound transport.
    ///
    /// `sink` is owned by a dedicated writer thread, so a worker that stops
    /// reading stdin can never block a caller.
    pub fn attach(&self, generation: u64, sink: Box<dyn Write + Send>) -> io::Result<()> {
        let (queue, outbound) = mpsc::channel();
        let pending = self.pending.clone();
        thread::Builder::new()
            .name(format!("worker-stdin-{}", generation))
            .spawn(move || write_requests(sink, outbound, &pending, generation))?;

        let mut transport = self.transport.lock();
        if let Some(old) = transport.as_ref() {
            warn!(
                old_generation = old.generation,
                generation, "Replacing transport that was never detached"
            );
        }
        *transport = Some(Transport { generation, queue });
        debug!(generation, "Transport attached");
        Ok(())
    }

    /// Detach the transport if it still belongs to `generation`.
    ///
    /// Returns true if a transport was detached. The writer thread closes the
    /// worker's stdin once its queue is drained.
    pub fn detach(&self, generation: u64) -> bool {
        let mut transport = self.transport.lock();
        match transport.as_ref() {
            Some(current) if current.generation == generation => {
                *transport = None;
                debug!(generation, "Transport detached");
                true
            }
            _ => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Number of calls currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fail every pending call with the error produced by `make_error`.
    ///
    /// The pending set is empty when this returns. Returns the number of
    /// calls that were failed.
    pub fn fail_all(&self, make_error: impl Fn() -> BridgeError) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            debug!(
                id,
                method = %call.method,
                generation = call.generation,
                "Failing pending call"
            );
            let _ = call.slot.try_send(Err(make_error()));
        }
        if count > 0 {
            info!(count, "Failed all pending calls");
        }
        count
    }

    /// Issue a call with the default deadline
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.default_timeout)
    }

    /// Issue a call and block until its response, its deadline, or worker exit.
    ///
    /// Fails immediately with `TransportUnavailable` when no worker is
    /// attached; in that case nothing is registered.
    #[instrument(skip(self, params), fields(id))]
    pub fn call_with_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let (slot, completion) = mpsc::sync_channel(1);

        let id = {
            let guard = self.transport.lock();
            let Some(transport) = guard.as_ref() else {
                return Err(BridgeError::TransportUnavailable(
                    "no worker attached".to_string(),
                ));
            };

            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::Span::current().record("id", id);

            let request = Request::new(id, method, params);
            let line = encode_request(&request)?;

            self.pending.lock().insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    generation: transport.generation,
                    issued_at: Instant::now(),
                    slot,
                },
            );

            logging::log_protocol_send(id, method, &line);
            if transport.queue.send(Outbound { id, line }).is_err() {
                self.pending.lock().remove(&id);
                warn!(id, method, "Worker stdin writer has exited");
                return Err(BridgeError::TransportUnavailable(
                    "worker stdin writer has exited".to_string(),
                ));
            }
            id
        };

        match completion.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.pending.lock().remove(&id).is_some() {
                    warn!(id, method, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                    return Err(BridgeError::Timeout {
                        method: method.to_string(),
                        timeout,
                    });
                }
                // Completed between the deadline and the removal above; whoever
                // removed the entry sends on the slot or drops it
                completion.recv().unwrap_or_else(|_| {
                    Err(BridgeError::Timeout {
                        method: method.to_string(),
                        timeout,
                    })
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::WorkerExited { code: None }),
        }
    }

    /// Resolve the pending call matching `response.id`.
    ///
    /// Responses with no matching entry (late after a timeout, or unknown)
    /// are ignored.
    pub fn handle_response(&self, response: Response) {
        let Some(call) = self.pending.lock().remove(&response.id) else {
            debug!(id = response.id, "Ignoring response with no pending call");
            return;
        };

        logging::log_protocol_recv(
            response.id,
            &call.method,
            response.is_error(),
            call.issued_at.elapsed().as_millis() as u64,
        );
        let _ = call.slot.try_send(response.into_result());
    }

    /// Read responses from the worker's stdout until end of stream.
    ///
    /// Runs on the per-generation reader thread.
    pub fn read_responses<R: Read>(&self, stdout: R, generation: u64) {
        let mut reader = ResponseReader::new(stdout);
        loop {
            match reader.next_response() {
                Ok(Some(response)) => self.handle_response(response),
                Ok(None) => break,
                Err(e) => {
                    warn!(generation, error = %e, "Worker stdout read error");
                    break;
                }
            }
        }
        debug!(generation, "Worker stdout reader exiting");
    }

    fn call_typed<P: Serialize>(&self, method: Method, params: &P) -> Result<Value> {
        let params = serde_json::to_value(params)?;
        self.call(method.as_str(), params)
    }

    /// Liveness probe
    pub fn ping(&self) -> Result<Value> {
        self.call(Method::Ping.as_str(), json!({}))
    }

    /// Ask the worker to process a staged download.
    ///
    /// The worker only reads `filepath`; the caller keeps ownership of it.
    pub fn process_download(
        &self,
        filepath: &str,
        source_url: Option<&str>,
        referrer_url: Option<&str>,
        options: &ProcessOptions,
    ) -> Result<Value> {
        self.process_download_params(&ProcessDownloadParams {
            filepath: filepath.to_string(),
            source_url: source_url.map(str::to_string),
            referrer_url: referrer_url.map(str::to_string),
            library_root: options.library_root.clone(),
            overwrite: options.overwrite,
        })
    }

    pub fn process_download_params(&self, params: &ProcessDownloadParams) -> Result<Value> {
        self.call_typed(Method::ProcessDownload, params)
    }

    pub fn list_components(&self, options: ListOptions) -> Result<Value> {
        self.call_typed(Method::ListComponents, &ListComponentsParams::from(options))
    }

    pub fn search_components(&self, query: &str, options: SearchOptions) -> Result<Value> {
        self.call_typed(
            Method::SearchComponents,
            &SearchComponentsParams {
                query: query.to_string(),
                library_root: options.library_root,
            },
        )
    }
}

/// Body of the per-generation stdin writer thread.
///
/// Runs until the transport is detached. After the first failed write every
/// queued request is failed with `TransportUnavailable` instead of written.
fn write_requests(
    mut sink: Box<dyn Write + Send>,
    outbound: Receiver<Outbound>,
    pending: &PendingTable,
    generation: u64,
) {
    let mut broken: Option<String> = None;
    for Outbound { id, line } in outbound {
        if broken.is_none() {
            if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
                warn!(generation, id, error = %e, "Failed to write request to worker stdin");
                broken = Some(e.to_string());
            }
        }

        if let Some(reason) = &broken {
            if let Some(call) = pending.lock().remove(&id) {
                let _ = call.slot.try_send(Err(BridgeError::TransportUnavailable(format!(
                    "failed to write to worker stdin: {}",
                    reason
                ))));
            }
        }
    }
    debug!(generation, "Worker stdin writer exiting");
}
