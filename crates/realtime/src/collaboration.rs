//! Collaboration broadcasts: cursors, typing indicators and data changes.
//!
//! Each operation is a no-op returning `Ok(None)` when collaboration is
//! disabled in the session config.

use crate::error::RealtimeResult;
use crate::event::{CursorPosition, DataChangePayload, EventKind, TypingPayload};
use crate::identity::ResourceRef;
use crate::session::{RealtimeSession, SentEvent};
use crate::transport::Connector;
use serde_json::{json, Value};
use tracing::trace;

impl<C: Connector> RealtimeSession<C> {
    fn collaboration_enabled(&self) -> bool {
        if !self.config().enable_collaboration {
            trace!("collaboration disabled, dropping broadcast");
            return false;
        }
        true
    }

    /// Broadcast the local cursor position.
    pub async fn update_cursor(&self, x: f64, y: f64) -> RealtimeResult<Option<SentEvent>> {
        if !self.collaboration_enabled() {
            return Ok(None);
        }
        let payload = json!({ "cursor": CursorPosition::new(x, y) });
        self.send_event(EventKind::CursorMove, payload).await.map(Some)
    }

    /// Broadcast whether the local user is typing, optionally in a field.
    pub async fn update_typing(
        &self,
        is_typing: bool,
        field: Option<&str>,
    ) -> RealtimeResult<Option<SentEvent>> {
        if !self.collaboration_enabled() {
            return Ok(None);
        }
        let payload = serde_json::to_value(TypingPayload {
            is_typing,
            field: field.map(str::to_string),
        })?;
        self.send_event(EventKind::Typing, payload).await.map(Some)
    }

    /// Broadcast a change to a resource.
    ///
    /// The event is tagged with the changed resource, not the session's own.
    pub async fn broadcast_data_change(
        &self,
        resource: &ResourceRef,
        change_type: &str,
        data: Value,
    ) -> RealtimeResult<Option<SentEvent>> {
        if !self.collaboration_enabled() {
            return Ok(None);
        }
        let payload = serde_json::to_value(DataChangePayload {
            resource_type: resource.resource_type.clone(),
            resource_id: resource.resource_id.clone(),
            change_type: change_type.to_string(),
            data,
        })?;
        self.send_event_for(EventKind::DataChange, payload, resource)
            .await
            .map(Some)
    }
}
