//! Realtime event records.
//!
//! Events are immutable once built. Everything a peer observes about another
//! peer (joins, leaves, cursor moves, typing, data changes, lock claims and
//! keep-alive pings) travels as a [`RealtimeEvent`].

use crate::identity::{ActorContext, ResourceRef, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a new unique event ID.
    pub fn generate() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of realtime event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Join,
    Leave,
    DataChange,
    CursorMove,
    Typing,
    Collaboration,
    Ping,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::DataChange => "data-change",
            EventKind::CursorMove => "cursor-move",
            EventKind::Typing => "typing",
            EventKind::Collaboration => "collaboration",
            EventKind::Ping => "ping",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single realtime event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl RealtimeEvent {
    /// Build an event attributed to `actor` with a fresh ID.
    pub fn new(
        kind: EventKind,
        actor: &ActorContext,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::generate(),
            kind,
            user_id: actor.user.id.clone(),
            tenant_id: actor.tenant_id.clone(),
            timestamp,
            payload,
            resource_id: None,
            resource_type: None,
        }
    }

    /// Attach the resource this event is about.
    pub fn with_resource(mut self, resource: &ResourceRef) -> Self {
        self.resource_id = Some(resource.resource_id.clone());
        self.resource_type = Some(resource.resource_type.clone());
        self
    }

    /// The resource this event is about, if any.
    pub fn resource(&self) -> Option<ResourceRef> {
        match (&self.resource_type, &self.resource_id) {
            (Some(t), Some(id)) => Some(ResourceRef::new(t.clone(), id.clone())),
            _ => None,
        }
    }

    /// Cursor carried by a `cursor-move` payload.
    pub fn cursor(&self) -> Option<CursorPosition> {
        self.payload
            .get("cursor")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typing flag and field carried by a `typing` payload.
    pub fn typing(&self) -> Option<TypingPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Profile carried by a `join` payload.
    pub fn join_info(&self) -> Option<JoinPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    pub fn data_change(&self) -> Option<DataChangePayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A pointer position on screen.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Payload of a `typing` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Payload of a `join` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

/// Payload of a `data-change` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChangePayload {
    pub resource_type: String,
    pub resource_id: String,
    pub change_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserIdentity;
    use serde_json::json;

    fn actor() -> ActorContext {
        ActorContext::new(UserIdentity::new("user-1", "Alice", "alice@example.com"), "acme")
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        let b = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EventKind::CursorMove).unwrap(),
            json!("cursor-move")
        );
        assert_eq!(
            serde_json::to_value(EventKind::DataChange).unwrap(),
            json!("data-change")
        );
        assert_eq!(EventKind::Collaboration.to_string(), "collaboration");
    }

    #[test]
    fn test_event_json_shape() {
        let event = RealtimeEvent::new(
            EventKind::CursorMove,
            &actor(),
            Utc::now(),
            json!({"cursor": {"x": 10.0, "y": 20.0}}),
        )
        .with_resource(&ResourceRef::new("invoice", "inv-1"));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "cursor-move");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["tenantId"], "acme");
        assert_eq!(value["resourceType"], "invoice");
        assert_eq!(value["resourceId"], "inv-1");
    }

    #[test]
    fn test_cursor_payload() {
        let event = RealtimeEvent::new(
            EventKind::CursorMove,
            &actor(),
            Utc::now(),
            json!({"cursor": {"x": 10, "y": 20}}),
        );
        assert_eq!(event.cursor(), Some(CursorPosition::new(10.0, 20.0)));
    }

    #[test]
    fn test_typing_payload() {
        let event = RealtimeEvent::new(
            EventKind::Typing,
            &actor(),
            Utc::now(),
            json!({"isTyping": true, "field": "memo"}),
        );
        let typing = event.typing().unwrap();
        assert!(typing.is_typing);
        assert_eq!(typing.field.as_deref(), Some("memo"));
    }

    #[test]
    fn test_missing_payload_fields() {
        let event = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        assert!(event.cursor().is_none());
        assert!(event.typing().is_none());
        assert!(event.join_info().is_none());
        assert!(event.resource().is_none());
    }
}
