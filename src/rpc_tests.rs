use super::*;
use crate::error::BridgeError;
use crate::protocol::{decode_response, DecodeResult, ListOptions, ProcessOptions, Request, Response};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Writer that forwards each complete line to a channel, standing in for the worker's stdin
struct ChannelWriter {
    tx: Sender<String>,
    buffer: Vec<u8>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            let _ = self.tx.send(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer whose every write fails, like a closed pipe
struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that blocks until released, like a full pipe to a worker that
/// stopped reading stdin
struct StalledPipe {
    release: Receiver<()>,
}

impl Write for StalledPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        let _ = self.release.recv();
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn attached_client(timeout: Duration) -> (Arc<RpcClient>, Receiver<Request>) {
    let client = Arc::new(RpcClient::new(timeout));
    let (line_tx, line_rx) = mpsc::channel::<String>();
    client.attach(
        1,
        Box::new(ChannelWriter {
            tx: line_tx,
            buffer: Vec::new(),
        }),
    )
    .unwrap();

    let (request_tx, request_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in line_rx {
            let request: Request = serde_json::from_str(&line).expect("request is valid JSON");
            if request_tx.send(request).is_err() {
                break;
            }
        }
    });
    (client, request_rx)
}

fn response_line(line: &str) -> Response {
    match decode_response(line) {
        DecodeResult::Response(response) => response,
        other => panic!("Expected a response, got {:?}", other),
    }
}

fn wait_for_pending(client: &RpcClient, count: usize) {
    let start = Instant::now();
    while client.pending_count() < count {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {} pending calls",
            count
        );
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_call_without_worker_fails_immediately() {
    let client = RpcClient::new(Duration::from_secs(30));
    let start = Instant::now();

    let result = client.call("ping", json!({}));

    assert!(matches!(result, Err(BridgeError::TransportUnavailable(_))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_request_envelope_and_success() {
    let (client, requests) = attached_client(Duration::from_secs(5));

    let caller = {
        let client = client.clone();
        thread::spawn(move || client.ping())
    };

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.method, "ping");
    assert_eq!(request.params, json!({}));

    client.handle_response(response_line(&format!(
        r#"{{"id":{},"result":"pong"}}"#,
        request.id
    )));

    assert_eq!(caller.join().unwrap().unwrap(), json!("pong"));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_ids_are_unique_and_increasing() {
    let (client, requests) = attached_client(Duration::from_secs(5));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let caller = {
            let client = client.clone();
            thread::spawn(move || client.ping())
        };
        let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
        ids.push(request.id);
        client.handle_response(response_line(&format!(
            r#"{{"id":{},"result":null}}"#,
            request.id
        )));
        caller.join().unwrap().unwrap();
    }

    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_correlation_under_reversed_responses() {
    let (client, requests) = attached_client(Duration::from_secs(10));
    let count = 8u64;

    let callers: Vec<_> = (0..count)
        .map(|n| {
            let client = client.clone();
            thread::spawn(move || {
                let result = client.call("echo", json!({"n": n}));
                (n, result)
            })
        })
        .collect();

    let mut received: Vec<Request> = (0..count)
        .map(|_| requests.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    wait_for_pending(&client, count as usize);

    // Answer in the opposite order of arrival; odd inputs fail
    received.reverse();
    for request in received {
        let n = request.params["n"].as_u64().unwrap();
        let line = if n % 2 == 1 {
            format!(r#"{{"id":{},"error":{{"message":"odd {}"}}}}"#, request.id, n)
        } else {
            format!(r#"{{"id":{},"result":{}}}"#, request.id, n * 10)
        };
        client.handle_response(response_line(&line));
    }

    for caller in callers {
        let (n, result) = caller.join().unwrap();
        if n % 2 == 1 {
            match result {
                Err(BridgeError::WorkerReported { message, .. }) => {
                    assert_eq!(message, format!("odd {}", n))
                }
                other => panic!("Expected worker error for {}, got {:?}", n, other),
            }
        } else {
            assert_eq!(result.unwrap(), json!(n * 10));
        }
    }
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_worker_error_message_is_verbatim() {
    let (client, requests) = attached_client(Duration::from_secs(5));

    let caller = {
        let client = client.clone();
        thread::spawn(move || {
            client.process_download(
                "/staging/1_widget_1234.zip",
                Some("https://cdn.example.com/widget_1234.zip"),
                None,
                &ProcessOptions::default(),
            )
        })
    };

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.method, "process_download");
    assert_eq!(request.params["filepath"], "/staging/1_widget_1234.zip");
    assert_eq!(request.params["overwrite"], false);
    assert_eq!(request.params["referrer_url"], Value::Null);

    client.handle_response(response_line(&format!(
        r#"{{"id":{},"error":{{"code":-32000,"message":"unsupported format"}}}}"#,
        request.id
    )));

    match caller.join().unwrap() {
        Err(err @ BridgeError::WorkerReported { .. }) => {
            assert_eq!(err.to_string(), "unsupported format")
        }
        other => panic!("Expected WorkerReported, got {:?}", other),
    }
}

#[test]
fn test_timeout_removes_pending_and_ignores_late_response() {
    let (client, requests) = attached_client(Duration::from_secs(30));

    let result = client.call_with_timeout("slow", json!({}), Duration::from_millis(50));
    match result {
        Err(BridgeError::Timeout { method, timeout }) => {
            assert_eq!(method, "slow");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert_eq!(client.pending_count(), 0);

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    client.handle_response(response_line(&format!(
        r#"{{"id":{},"result":"too late"}}"#,
        request.id
    )));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_timeout_of_one_call_does_not_affect_others() {
    let (client, requests) = attached_client(Duration::from_secs(30));

    let patient = {
        let client = client.clone();
        thread::spawn(move || client.call_with_timeout("patient", json!({}), Duration::from_secs(10)))
    };
    let first = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.method, "patient");

    let hasty = client.call_with_timeout("hasty", json!({}), Duration::from_millis(30));
    assert!(matches!(hasty, Err(BridgeError::Timeout { .. })));
    assert_eq!(client.pending_count(), 1);

    client.handle_response(response_line(&format!(
        r#"{{"id":{},"result":"ok"}}"#,
        first.id
    )));
    assert_eq!(patient.join().unwrap().unwrap(), json!("ok"));
}

#[test]
fn test_fail_all_fails_every_outstanding_call() {
    let (client, requests) = attached_client(Duration::from_secs(30));

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || client.ping())
        })
        .collect();
    for _ in 0..3 {
        requests.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    wait_for_pending(&client, 3);

    assert!(client.detach(1));
    let failed = client.fail_all(|| BridgeError::WorkerExited { code: Some(3) });
    assert_eq!(failed, 3);
    assert_eq!(client.pending_count(), 0);

    for caller in callers {
        assert!(matches!(
            caller.join().unwrap(),
            Err(BridgeError::WorkerExited { code: Some(3) })
        ));
    }

    // The transport is gone, so new calls fail immediately
    assert!(matches!(
        client.ping(),
        Err(BridgeError::TransportUnavailable(_))
    ));
}

#[test]
fn test_detach_ignores_other_generation() {
    let (client, _requests) = attached_client(Duration::from_secs(5));
    assert!(!client.detach(2));
    assert!(client.is_attached());
    assert!(client.detach(1));
    assert!(!client.is_attached());
}

#[test]
fn test_write_failure_unregisters_call() {
    let client = RpcClient::new(Duration::from_secs(5));
    client.attach(1, Box::new(BrokenPipe)).unwrap();

    let result = client.ping();

    assert!(matches!(result, Err(BridgeError::TransportUnavailable(_))));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_list_components_sends_paging_defaults() {
    let (client, requests) = attached_client(Duration::from_secs(5));

    let caller = {
        let client = client.clone();
        thread::spawn(move || {
            client.list_components(ListOptions {
                offset: Some(200),
                ..ListOptions::default()
            })
        })
    };

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.method, "list_components");
    assert_eq!(request.params["limit"], 100);
    assert_eq!(request.params["offset"], 200);

    client.handle_response(response_line(&format!(r#"{{"id":{},"result":[]}}"#, request.id)));
    assert_eq!(caller.join().unwrap().unwrap(), json!([]));
}

#[test]
fn test_read_responses_resolves_from_stream() {
    let (client, requests) = attached_client(Duration::from_secs(5));

    let caller = {
        let client = client.clone();
        thread::spawn(move || client.search_components("regulator", Default::default()))
    };
    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.params["query"], "regulator");

    let stdout = format!(
        "garbage line\n{{\"id\":999,\"result\":\"stray\"}}\n{{\"id\":{},\"result\":[{{\"mpn\":\"LM7805\"}}]}}\n",
        request.id
    );
    client.read_responses(io::Cursor::new(stdout), 1);

    assert_eq!(
        caller.join().unwrap().unwrap(),
        json!([{"mpn": "LM7805"}])
    );
}

#[test]
fn test_stalled_stdin_does_not_block_callers() {
    let client = Arc::new(RpcClient::new(Duration::from_secs(30)));
    let (release, stalled) = mpsc::channel();
    client
        .attach(1, Box::new(StalledPipe { release: stalled }))
        .unwrap();

    let big = "x".repeat(256 * 1024);
    let callers: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            let big = big.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = client.call_with_timeout(
                    "search_components",
                    json!({ "query": big }),
                    Duration::from_millis(200),
                );
                (result, start.elapsed())
            })
        })
        .collect();

    for caller in callers {
        let (result, elapsed) = caller.join().unwrap();
        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
        assert!(elapsed < Duration::from_millis(1500));
    }
    assert_eq!(client.pending_count(), 0);

    let start = Instant::now();
    assert!(client.detach(1));
    assert!(start.elapsed() < Duration::from_millis(500));
    drop(release);
}
