//! Notification feed fed by realtime events.

use crate::event::{EventId, EventKind, RealtimeEvent};
use crate::identity::{ResourceRef, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Number of notifications retained by default.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Severity of a notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A single notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Event the notification was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
            created_at,
            read: false,
            source_event: None,
            resource: None,
        }
    }

    pub fn with_level(mut self, level: NotificationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Build a notification from a `data-change` event.
    pub fn from_data_change(event: &RealtimeEvent) -> Option<Self> {
        if event.kind != EventKind::DataChange {
            return None;
        }
        let change = event.data_change()?;
        let title = format!("{} {}", change.resource_type, change.change_type);
        let message = format!(
            "{} {} {} {}",
            event.user_id, change.change_type, change.resource_type, change.resource_id
        );

        let mut notification = Notification::new(title, message, event.timestamp)
            .with_resource(ResourceRef::new(change.resource_type, change.resource_id));
        notification.source_event = Some(event.id);
        Some(notification)
    }
}

/// Unread notifications in `notifications`.
pub fn unread_count<'a>(notifications: impl IntoIterator<Item = &'a Notification>) -> usize {
    notifications.into_iter().filter(|n| !n.read).count()
}

/// Capped notification list, newest first.
#[derive(Clone, Debug)]
pub struct NotificationFeed {
    items: VecDeque<Notification>,
    capacity: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a notification at the front, dropping the oldest past capacity.
    pub fn push(&mut self, notification: Notification) {
        self.items.push_front(notification);
        self.items.truncate(self.capacity);
    }

    /// Convert a `data-change` event from another user into a notification.
    ///
    /// Typically fed from [`RealtimeSession::subscribe`](crate::RealtimeSession::subscribe).
    ///
    /// Returns `true` if a notification was added.
    pub fn ingest(&mut self, event: &RealtimeEvent, local_user: &UserId) -> bool {
        if event.user_id == *local_user {
            return false;
        }
        if self.items.iter().any(|n| n.source_event == Some(event.id)) {
            return false;
        }
        match Notification::from_data_change(event) {
            Some(notification) => {
                self.push(notification);
                true
            }
            None => false,
        }
    }

    /// Returns `false` if no notification has `id`.
    pub fn mark_as_read(&mut self, id: Uuid) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_as_read(&mut self) {
        for notification in &mut self.items {
            notification.read = true;
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Notification> {
        let index = self.items.iter().position(|n| n.id == id)?;
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn unread_count(&self) -> usize {
        unread_count(&self.items)
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> + '_ {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ActorContext, UserIdentity};
    use serde_json::json;

    fn notification(n: usize) -> Notification {
        Notification::new(format!("Title {n}"), format!("Message {n}"), Utc::now())
    }

    fn data_change(actor: &ActorContext) -> RealtimeEvent {
        RealtimeEvent::new(
            EventKind::DataChange,
            actor,
            Utc::now(),
            json!({
                "resourceType": "invoice",
                "resourceId": "inv-1",
                "changeType": "update",
                "data": {},
            }),
        )
    }

    #[test]
    fn test_unread_count_after_marking() {
        let mut feed = NotificationFeed::new();
        for n in 0..5 {
            feed.push(notification(n));
        }
        let ids: Vec<Uuid> = feed.iter().take(2).map(|n| n.id).collect();
        for id in ids {
            assert!(feed.mark_as_read(id));
        }
        assert_eq!(feed.unread_count(), 3);
    }

    #[test]
    fn test_newest_first_and_capped() {
        let mut feed = NotificationFeed::new();
        for n in 0..105 {
            feed.push(notification(n));
        }
        assert_eq!(feed.len(), 100);
        assert_eq!(feed.iter().next().unwrap().title, "Title 104");
        assert_eq!(feed.iter().last().unwrap().title, "Title 5");
    }

    #[test]
    fn test_mark_all_remove_clear() {
        let mut feed = NotificationFeed::with_capacity(10);
        feed.push(notification(1));
        feed.push(notification(2));
        let first = feed.iter().next().unwrap().id;

        feed.mark_all_as_read();
        assert_eq!(feed.unread_count(), 0);

        assert!(feed.remove(first).is_some());
        assert!(feed.remove(first).is_none());
        assert!(!feed.mark_as_read(first));
        assert_eq!(feed.len(), 1);

        feed.clear();
        assert!(feed.is_empty());
    }

    #[test]
    fn test_ingest_data_change_from_other_user() {
        let me = ActorContext::new(UserIdentity::new("user-1", "Alice", ""), "acme");
        let other = ActorContext::new(UserIdentity::new("user-2", "Bob", ""), "acme");
        let mut feed = NotificationFeed::new();

        assert!(!feed.ingest(&data_change(&me), me.user_id()));

        let event = data_change(&other);
        assert!(feed.ingest(&event, me.user_id()));
        assert!(!feed.ingest(&event, me.user_id()));

        let n = feed.iter().next().unwrap();
        assert_eq!(n.title, "invoice update");
        assert_eq!(n.source_event, Some(event.id));
        assert_eq!(n.resource, Some(ResourceRef::new("invoice", "inv-1")));
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn test_ingest_ignores_other_kinds() {
        let other = ActorContext::new(UserIdentity::new("user-2", "Bob", ""), "acme");
        let ping = RealtimeEvent::new(EventKind::Ping, &other, Utc::now(), json!({}));
        let mut feed = NotificationFeed::new();
        assert!(!feed.ingest(&ping, &UserId::new("user-1")));
    }

    #[test]
    fn test_unread_count_is_pure() {
        let mut read = notification(1);
        read.read = true;
        let items = vec![read, notification(2)];
        assert_eq!(unread_count(&items), 1);
        assert_eq!(unread_count(&items), 1);
    }
}
