//! WebSocket wire protocol.
//!
//! Frames are JSON text messages tagged by `type`. A client opens with
//! `hello`, waits for `welcome`, then sends `event` frames; the relay answers
//! each one with an `ack` and forwards it to the other members of the channel
//! as an `event` frame.

use crate::event::{EventId, RealtimeEvent};
use crate::identity::{ActorContext, ChannelId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported frame: {0}")]
    Unsupported(&'static str),
}

/// Frames sent from client to relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Identify the actor and pick the channel. Must be the first frame.
    Hello {
        actor: ActorContext,
        channel: ChannelId,
    },

    /// Publish an event to the channel.
    Event { event: RealtimeEvent },

    /// Connection health check.
    Ping,
}

/// Frames sent from relay to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    Welcome {
        channel: ChannelId,
        /// Users already connected to the channel
        members: Vec<UserId>,
    },

    /// An event published by another member.
    Event { event: RealtimeEvent },

    /// The relay accepted an event.
    Ack {
        #[serde(rename = "eventId")]
        event_id: EventId,
    },

    /// Something went wrong; `code` is machine-readable. Carries the event
    /// ID when a specific event was refused.
    Error {
        code: String,
        message: String,
        #[serde(rename = "eventId", default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
    },

    Pong,
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    /// Create an error frame.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            event_id: None,
        }
    }

    /// Create an error frame refusing one event.
    pub fn rejected(event_id: EventId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            event_id: Some(event_id),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::identity::UserIdentity;
    use chrono::Utc;
    use serde_json::json;

    fn actor() -> ActorContext {
        ActorContext::new(UserIdentity::new("user-1", "Alice", "alice@example.com"), "acme")
    }

    #[test]
    fn test_hello_deserialization() {
        let text = r#"{
            "type": "hello",
            "actor": {"user": {"id": "user-1", "name": "Alice", "email": "alice@example.com"}, "tenantId": "acme"},
            "channel": "tenant/acme"
        }"#;
        match ClientFrame::from_json(text).unwrap() {
            ClientFrame::Hello { actor: a, channel } => {
                assert_eq!(a, actor());
                assert_eq!(channel.as_str(), "tenant/acme");
            }
            other => panic!("Wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_event_frame_keeps_event_type() {
        let event = RealtimeEvent::new(EventKind::CursorMove, &actor(), Utc::now(), json!({}));
        let text = ClientFrame::Event { event: event.clone() }.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "cursor-move");
        assert_eq!(ClientFrame::from_json(&text).unwrap(), ClientFrame::Event { event });
    }

    #[test]
    fn test_ack_serialization() {
        let id = EventId::generate();
        let text = ServerFrame::Ack { event_id: id }.to_json().unwrap();
        assert!(text.contains(r#""type":"ack""#));
        assert!(text.contains("eventId"));
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(ClientFrame::from_json(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert_eq!(ServerFrame::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_error_frame_event_id_optional() {
        let text = ServerFrame::error("not_joined", "Send hello first").to_json().unwrap();
        assert!(!text.contains("eventId"));

        let id = EventId::generate();
        let text = ServerFrame::rejected(id, "forbidden", "Wrong tenant").to_json().unwrap();
        match ServerFrame::from_json(&text).unwrap() {
            ServerFrame::Error { event_id, code, .. } => {
                assert_eq!(event_id, Some(id));
                assert_eq!(code, "forbidden");
            }
            other => panic!("Wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_frame() {
        assert!(matches!(
            ClientFrame::from_json(r#"{"type":"bogus"}"#),
            Err(WireError::Json(_))
        ));
    }
}
