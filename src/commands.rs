//! Host commands from the presentation layer.
//!
//! Each command is one JSON object with a `type` tag:
//!
//! ```json
//! {"type": "navigate", "url": "www.snapeda.com"}
//! {"type": "navigate-back"}
//! {"type": "get-url"}
//! {"type": "list-components", "options": {"limit": 20}}
//! {"type": "search-components", "query": "LM7805"}
//! {"type": "ping-worker"}
//! {"type": "set-browser-view-visible", "visible": false}
//! ```
//!
//! Navigation commands go to the browser shell; component commands and the
//! ping go to the worker.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventRelay, HostEvent};
use crate::protocol::{ListOptions, SearchOptions};
use crate::rpc::RpcClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostCommand {
    Navigate {
        url: String,
    },
    NavigateBack,
    NavigateForward,
    Reload,
    GetUrl,
    ListComponents {
        #[serde(default)]
        options: ListOptions,
    },
    SearchComponents {
        query: String,
        #[serde(default)]
        options: SearchOptions,
    },
    /// Liveness probe of the worker
    #[serde(rename = "ping-worker")]
    Ping,
    SetBrowserViewVisible {
        visible: bool,
    },
}

/// The embedded browser, as far as the host needs to drive it
pub trait BrowserShell: Send {
    fn navigate(&mut self, url: &str);
    /// No-op when there is no history to go back to
    fn go_back(&mut self);
    fn go_forward(&mut self);
    fn reload(&mut self);
    fn current_url(&self) -> Option<String>;
    fn set_visible(&mut self, visible: bool);
}

/// Add `https://` unless the URL already names http or https
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// In-memory browser with linear history, for running without a window.
///
/// Emits `url-changed` on every navigation like a real view would.
#[derive(Debug)]
pub struct HeadlessShell {
    history: Vec<String>,
    /// Index into `history` of the current page
    position: Option<usize>,
    visible: bool,
    relay: EventRelay,
}

impl HeadlessShell {
    pub fn new(relay: EventRelay) -> Self {
        Self {
            history: Vec::new(),
            position: None,
            visible: true,
            relay,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    fn announce(&self) {
        if let Some(url) = self.current_url() {
            self.relay.emit(HostEvent::UrlChanged { url });
        }
    }
}

impl BrowserShell for HeadlessShell {
    fn navigate(&mut self, url: &str) {
        let next = self.position.map_or(0, |p| p + 1);
        self.history.truncate(next);
        self.history.push(url.to_string());
        self.position = Some(next);
        self.announce();
    }

    fn go_back(&mut self) {
        if let Some(p) = self.position.filter(|p| *p > 0) {
            self.position = Some(p - 1);
            self.announce();
        }
    }

    fn go_forward(&mut self) {
        if let Some(p) = self.position.filter(|p| p + 1 < self.history.len()) {
            self.position = Some(p + 1);
            self.announce();
        }
    }

    fn reload(&mut self) {
        debug!(url = ?self.current_url(), "Reload");
    }

    fn current_url(&self) -> Option<String> {
        self.position.and_then(|p| self.history.get(p).cloned())
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// Routes host commands to the browser shell or the worker
pub struct CommandRouter<S: BrowserShell> {
    shell: S,
    client: Arc<RpcClient>,
}

impl<S: BrowserShell> CommandRouter<S> {
    pub fn new(shell: S, client: Arc<RpcClient>) -> Self {
        Self { shell, client }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Execute one command. Shell commands answer `null`, except `get-url`
    /// which answers the current URL (or `null` before any navigation).
    pub fn dispatch(&mut self, command: HostCommand) -> Result<Value> {
        debug!(command = ?command, "Dispatching host command");
        match command {
            HostCommand::Navigate { url } => {
                self.shell.navigate(&normalize_url(&url));
                Ok(Value::Null)
            }
            HostCommand::NavigateBack => {
                self.shell.go_back();
                Ok(Value::Null)
            }
            HostCommand::NavigateForward => {
                self.shell.go_forward();
                Ok(Value::Null)
            }
            HostCommand::Reload => {
                self.shell.reload();
                Ok(Value::Null)
            }
            HostCommand::GetUrl => Ok(self.shell.current_url().map_or(Value::Null, Value::String)),
            HostCommand::ListComponents { options } => self.client.list_components(options),
            HostCommand::SearchComponents { query, options } => {
                self.client.search_components(&query, options)
            }
            HostCommand::Ping => self.client.ping(),
            HostCommand::SetBrowserViewVisible { visible } => {
                self.shell.set_visible(visible);
                Ok(Value::Null)
            }
        }
    }
}

/// Read JSONL host commands from `input` on a background thread.
///
/// Unparseable lines are logged and skipped. The thread exits at end of
/// input or when the receiver is dropped.
pub fn spawn_command_listener<R: BufRead + Send + 'static>(
    input: R,
) -> std::io::Result<async_channel::Receiver<HostCommand>> {
    let (tx, rx) = async_channel::bounded(100);

    thread::Builder::new()
        .name("host-commands".to_string())
        .spawn(move || {
            info!("Host command listener started");
            for line in input.lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => {
                        match serde_json::from_str::<HostCommand>(&line) {
                            Ok(command) => {
                                if tx.send_blocking(command).is_err() {
                                    debug!("Command channel closed");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, line = %line, "Failed to parse host command"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading host commands");
                        break;
                    }
                }
            }
            info!("Host command listener exiting");
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::io::Cursor;

    fn router() -> (CommandRouter<HeadlessShell>, async_channel::Receiver<HostEvent>) {
        let relay = EventRelay::new();
        let events = relay.subscribe();
        let router = CommandRouter::new(HeadlessShell::new(relay), Arc::new(RpcClient::default()));
        (router, events)
    }

    #[test]
    fn test_command_deserialization() {
        let cmd: HostCommand = serde_json::from_str(r#"{"type": "navigate", "url": "digikey.com"}"#).unwrap();
        assert_eq!(
            cmd,
            HostCommand::Navigate {
                url: "digikey.com".to_string()
            }
        );

        let cmd: HostCommand = serde_json::from_str(r#"{"type": "ping-worker"}"#).unwrap();
        assert_eq!(cmd, HostCommand::Ping);

        let cmd: HostCommand = serde_json::from_str(
            r#"{"type": "list-components", "options": {"limit": 20, "libraryRoot": "/libs"}}"#,
        )
        .unwrap();
        match cmd {
            HostCommand::ListComponents { options } => {
                assert_eq!(options.limit, Some(20));
                assert_eq!(options.offset, None);
                assert_eq!(options.library_root.as_deref(), Some("/libs"));
            }
            other => panic!("Expected ListComponents, got {:?}", other),
        }

        let cmd: HostCommand =
            serde_json::from_str(r#"{"type": "search-components", "query": "LM7805"}"#).unwrap();
        assert!(matches!(cmd, HostCommand::SearchComponents { ref query, .. } if query == "LM7805"));

        assert!(serde_json::from_str::<HostCommand>(r#"{"type": "format-disk"}"#).is_err());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("www.snapeda.com"), "https://www.snapeda.com");
        assert_eq!(normalize_url("http://localhost:8080"), "http://localhost:8080");
        assert_eq!(normalize_url(" https://mouser.com "), "https://mouser.com");
    }

    #[test]
    fn test_navigation_history() {
        let (mut router, events) = router();

        assert_eq!(router.dispatch(HostCommand::GetUrl).unwrap(), Value::Null);
        for url in ["digikey.com", "mouser.com", "lcsc.com"] {
            router
                .dispatch(HostCommand::Navigate {
                    url: url.to_string(),
                })
                .unwrap();
        }
        router.dispatch(HostCommand::NavigateBack).unwrap();
        router.dispatch(HostCommand::NavigateBack).unwrap();
        router.dispatch(HostCommand::NavigateBack).unwrap();
        assert_eq!(
            router.dispatch(HostCommand::GetUrl).unwrap(),
            Value::String("https://digikey.com".to_string())
        );

        router.dispatch(HostCommand::NavigateForward).unwrap();
        router
            .dispatch(HostCommand::Navigate {
                url: "octopart.com".to_string(),
            })
            .unwrap();
        router.dispatch(HostCommand::NavigateForward).unwrap();
        assert_eq!(
            router.dispatch(HostCommand::GetUrl).unwrap(),
            Value::String("https://octopart.com".to_string())
        );

        let urls: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                HostEvent::UrlChanged { url } => Some(url),
                _ => None,
            })
            .collect();
        assert_eq!(urls.first().map(String::as_str), Some("https://digikey.com"));
        assert_eq!(urls.last().map(String::as_str), Some("https://octopart.com"));
        assert_eq!(urls.len(), 7);
    }

    #[test]
    fn test_visibility() {
        let (mut router, _events) = router();
        router
            .dispatch(HostCommand::SetBrowserViewVisible { visible: false })
            .unwrap();
        assert!(!router.shell().is_visible());
    }

    #[test]
    fn test_worker_commands_without_worker() {
        let (mut router, _events) = router();
        assert!(matches!(
            router.dispatch(HostCommand::Ping),
            Err(BridgeError::TransportUnavailable(_))
        ));
        assert!(matches!(
            router.dispatch(HostCommand::SearchComponents {
                query: "regulator".to_string(),
                options: SearchOptions::default(),
            }),
            Err(BridgeError::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_listener_skips_bad_lines() {
        let input = Cursor::new("{\"type\": \"reload\"}\nnot json\n\n{\"type\": \"get-url\"}\n");
        let rx = spawn_command_listener(input).unwrap();

        assert_eq!(rx.recv_blocking().unwrap(), HostCommand::Reload);
        assert_eq!(rx.recv_blocking().unwrap(), HostCommand::GetUrl);
        assert!(rx.recv_blocking().is_err());
    }
}
