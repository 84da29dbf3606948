//! Event types delivered to the embedding host

use serde_json::json;
use std::sync::Arc;

/// Category of a host-bound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Connection opened or closed
    Connection,
    /// Transport, device, or protocol failure
    Error,
    /// Transcription of the model's spoken output
    Transcript,
    /// Text returned directly by the model
    Text,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Error => "error",
            Self::Transcript => "transcript",
            Self::Text => "text",
        }
    }
}

/// One event delivered to the host callback.
#[derive(Debug, Clone)]
pub struct HostEvent {
    pub message: String,
    pub kind: EventKind,
}

impl HostEvent {
    pub fn new(message: impl Into<String>, kind: EventKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Render as the `{"type":...,"message":...}` JSON string hosts forward
    /// across language boundaries.
    pub fn to_json(&self) -> String {
        json!({
            "type": self.kind.as_str(),
            "message": self.message,
        })
        .to_string()
    }
}

/// Host-supplied callback invoked for every [`HostEvent`].
///
/// Called from the engine's worker tasks; implementations must be cheap or
/// hand the event off to the host's own queue.
pub type MessageCallback = Arc<dyn Fn(HostEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_wire_names() {
        assert_eq!(EventKind::Connection.as_str(), "connection");
        assert_eq!(EventKind::Error.as_str(), "error");
        assert_eq!(EventKind::Transcript.as_str(), "transcript");
        assert_eq!(EventKind::Text.as_str(), "text");
    }

    #[test]
    fn to_json_escapes_message() {
        let event = HostEvent::new("line\"one\"\nline two", EventKind::Text);
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["type"], "text");
        assert_eq!(parsed["message"], "line\"one\"\nline two");
    }
}
