use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Event kinds every sandbox emits over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    End,
    Error,
    Stdout,
    Stderr,
}

/// JSON-shaped event record with stable field names.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Single-producer multi-consumer event channel for one sandbox.
/// Emission never blocks; events are dropped when nobody listens.
pub struct EventBus {
    tx: broadcast::Sender<SandboxEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind, command: &str, data: Option<String>) {
        let event = SandboxEvent {
            kind,
            command: command.to_string(),
            timestamp: Utc::now(),
            data,
        };
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_stable_field_names() {
        let event = SandboxEvent {
            kind: EventKind::Start,
            command: "echo hi".to_string(),
            timestamp: Utc::now(),
            data: None,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["command"], "echo hi");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("data").is_none(), "empty data is omitted");
    }

    #[test]
    fn output_event_carries_data() {
        let event = SandboxEvent {
            kind: EventKind::Stdout,
            command: "ls".to_string(),
            timestamp: Utc::now(),
            data: Some("file.txt\n".to_string()),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stdout");
        assert_eq!(json["data"], "file.txt\n");
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EventKind::Start, "true", None);
        bus.emit(EventKind::End, "true", None);

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Start);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::End);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(EventKind::Error, "x", Some("boom".to_string()));
    }
}
