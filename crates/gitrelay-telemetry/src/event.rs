//! RPC boundary events.

use chrono::{DateTime, Utc};
use gitrelay_git::{Phase, Service};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an event opens or closes an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Request accepted, subprocess about to start.
    Start,
    /// Request finished, successfully or not.
    End,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Start => "start",
            EventKind::End => "end",
        })
    }
}

/// One observation at an RPC boundary, stored as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was emitted.
    pub ts: DateTime<Utc>,
    /// Start or end.
    pub kind: EventKind,
    /// Ties the start and end of one request together.
    #[serde(default)]
    pub correlation_id: String,
    /// Smart HTTP service.
    pub service: Service,
    /// Advertisement or RPC.
    pub phase: Phase,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    /// Repository identity, `owner/name`.
    #[serde(default)]
    pub repo: String,
    /// Value of the `Git-Protocol` header.
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub user_id: String,
    /// Protocol v2 command (`fetch`, `ls-refs`), upload-pack only.
    #[serde(default)]
    pub command: String,
    /// Key-sorted `key=value` command parameters.
    #[serde(default)]
    pub command_params: String,
    /// HTTP status, end events only.
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,
    /// Error text, empty on success.
    #[serde(default)]
    pub error: String,
}

impl Event {
    /// Creates a start event stamped now.
    pub fn start(service: Service, phase: Phase) -> Self {
        Self {
            ts: Utc::now(),
            kind: EventKind::Start,
            correlation_id: String::new(),
            service,
            phase,
            method: String::new(),
            path: String::new(),
            repo: String::new(),
            protocol: String::new(),
            remote_ip: String::new(),
            user_agent: String::new(),
            user_id: String::new(),
            command: String::new(),
            command_params: String::new(),
            status: 0,
            duration_ms: 0,
            bytes_in: 0,
            bytes_out: 0,
            error: String::new(),
        }
    }

    /// Derives the matching end event, stamped now.
    pub fn to_end(&self) -> Self {
        Self {
            ts: Utc::now(),
            kind: EventKind::End,
            ..self.clone()
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty() || self.status >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let mut event = Event::start(Service::UploadPack, Phase::Rpc);
        event.repo = "alice/project".into();
        event.command_params = "deepen=1".into();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "start");
        assert_eq!(json["service"], "upload-pack");
        assert_eq!(json["phase"], "rpc");
        assert_eq!(json["repo"], "alice/project");
    }

    #[test]
    fn test_end_keeps_identity() {
        let mut start = Event::start(Service::ReceivePack, Phase::Rpc);
        start.correlation_id = "abc".into();
        let end = start.to_end();
        assert_eq!(end.kind, EventKind::End);
        assert_eq!(end.correlation_id, "abc");
        assert!(end.ts >= start.ts);
    }

    #[test]
    fn test_sparse_line_parses() {
        let line = r#"{"ts":"2024-01-10T12:00:00Z","kind":"end","service":"upload-pack","phase":"advertise"}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.phase, Phase::Advertise);
        assert!(event.repo.is_empty());
        assert!(!event.is_error());
    }
}
