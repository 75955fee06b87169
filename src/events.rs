//! Notifications toward the presentation layer.
//!
//! Every notification is a named channel plus a JSON payload:
//!
//! ```json
//! {"channel": "capture-started", "payload": {"filename": "widget_1234.zip", "sourceUrl": "https://..."}}
//! {"channel": "processing-complete", "payload": {"status": "success", "mpn": "WIDGET-1234"}}
//! ```
//!
//! `EventRelay` fans each event out to any number of subscribers. Delivery
//! never blocks the emitter; subscribers whose receiver was dropped are
//! pruned on the next emit.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum HostEvent {
    #[serde(rename_all = "camelCase")]
    CaptureStarted {
        filename: String,
        source_url: Option<String>,
    },
    /// `percent` is 0 when the total size is unknown
    #[serde(rename_all = "camelCase")]
    CaptureProgress {
        filename: String,
        percent: u32,
        received: u64,
        total: u64,
    },
    CaptureComplete { filename: String },
    /// `error` is `"Download <state>"`
    CaptureError { filename: String, error: String },
    ProcessingStarted { filename: String },
    /// The worker's result payload, forwarded unchanged
    ProcessingComplete(Value),
    ProcessingError { filename: String, error: String },
    /// The browser view navigated
    UrlChanged { url: String },
}

impl HostEvent {
    /// Channel name as it appears on the wire
    pub fn channel(&self) -> &'static str {
        match self {
            Self::CaptureStarted { .. } => "capture-started",
            Self::CaptureProgress { .. } => "capture-progress",
            Self::CaptureComplete { .. } => "capture-complete",
            Self::CaptureError { .. } => "capture-error",
            Self::ProcessingStarted { .. } => "processing-started",
            Self::ProcessingComplete(_) => "processing-complete",
            Self::ProcessingError { .. } => "processing-error",
            Self::UrlChanged { .. } => "url-changed",
        }
    }
}

/// Fan-out of host events to subscribers. Clones share the subscriber list.
#[derive(Debug, Clone, Default)]
pub struct EventRelay {
    subscribers: Arc<Mutex<Vec<async_channel::Sender<HostEvent>>>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> async_channel::Receiver<HostEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: HostEvent) {
        debug!(channel = event.channel(), "Emitting host event");
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_channel_and_camel_case_payload() {
        let event = HostEvent::CaptureStarted {
            filename: "widget_1234.zip".to_string(),
            source_url: Some("https://cdn.example.com/widget_1234.zip".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "channel": "capture-started",
                "payload": {
                    "filename": "widget_1234.zip",
                    "sourceUrl": "https://cdn.example.com/widget_1234.zip"
                }
            })
        );
    }

    #[test]
    fn test_processing_complete_forwards_payload() {
        let payload = json!({"status": "success", "mpn": "WIDGET-1234"});
        let event = HostEvent::ProcessingComplete(payload.clone());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["channel"], "processing-complete");
        assert_eq!(value["payload"], payload);
    }

    #[test]
    fn test_channel_names_match_serialization() {
        let events = vec![
            HostEvent::CaptureProgress {
                filename: "a.zip".to_string(),
                percent: 50,
                received: 5,
                total: 10,
            },
            HostEvent::CaptureComplete {
                filename: "a.zip".to_string(),
            },
            HostEvent::CaptureError {
                filename: "a.zip".to_string(),
                error: "Download cancelled".to_string(),
            },
            HostEvent::ProcessingStarted {
                filename: "a.zip".to_string(),
            },
            HostEvent::ProcessingError {
                filename: "a.zip".to_string(),
                error: "unsupported format".to_string(),
            },
            HostEvent::UrlChanged {
                url: "https://www.snapeda.com".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["channel"], event.channel());
        }
    }

    #[test]
    fn test_relay_fans_out_and_prunes_closed() {
        let relay = EventRelay::new();
        let first = relay.subscribe();
        let second = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 2);

        drop(second);
        relay.emit(HostEvent::ProcessingStarted {
            filename: "a.zip".to_string(),
        });

        assert_eq!(relay.subscriber_count(), 1);
        assert_eq!(first.try_recv().unwrap().channel(), "processing-started");
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let relay = EventRelay::new();
        relay.emit(HostEvent::CaptureComplete {
            filename: "a.zip".to_string(),
        });
        assert_eq!(relay.subscriber_count(), 0);
    }
}
