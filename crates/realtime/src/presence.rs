//! Presence tracking for users viewing a shared resource.
//!
//! This module keeps one entry per user, refreshed by every event attributed
//! to that user, and derives the "online" view from a liveness window.

use crate::event::{CursorPosition, EventKind, RealtimeEvent};
use crate::identity::{color_for, UserId, UserIdentity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default liveness window (5 minutes).
pub fn default_liveness_window() -> Duration {
    Duration::minutes(5)
}

/// A user present on the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Display color derived from the user ID
    pub color: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
}

impl RealtimeUser {
    /// Create a presence entry for a known identity.
    pub fn new(identity: &UserIdentity, last_seen: DateTime<Utc>) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            color: color_for(&identity.id),
            last_seen,
            cursor: None,
            is_typing: None,
            typing_field: None,
            current_page: None,
        }
    }

    /// Create an entry for a user seen only through an event.
    fn placeholder(id: &UserId, last_seen: DateTime<Utc>) -> Self {
        Self::new(&UserIdentity::new(id.clone(), id.as_str(), ""), last_seen)
    }

    /// Whether the user was seen within `window` of `now`.
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_seen) <= window
    }
}

/// Filter `users` down to those seen within `window` of `now`.
///
/// Ordered by name, then ID.
pub fn online_users<'a>(
    users: impl IntoIterator<Item = &'a RealtimeUser>,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<RealtimeUser> {
    let mut online: Vec<RealtimeUser> = users
        .into_iter()
        .filter(|u| u.is_live(now, window))
        .cloned()
        .collect();
    online.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    online
}

/// Active-user set for one collaboration session.
#[derive(Clone, Debug)]
pub struct PresenceTracker {
    users: HashMap<UserId, RealtimeUser>,
    liveness_window: Duration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    /// Create a tracker with the default liveness window.
    pub fn new() -> Self {
        Self::with_liveness_window(default_liveness_window())
    }

    /// Create a tracker with a custom liveness window.
    pub fn with_liveness_window(liveness_window: Duration) -> Self {
        Self {
            users: HashMap::new(),
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Insert or replace a user's entry.
    pub fn upsert(&mut self, user: RealtimeUser) {
        self.users.insert(user.id.clone(), user);
    }

    /// Remove a user, returning the entry.
    pub fn remove(&mut self, user_id: &UserId) -> Option<RealtimeUser> {
        self.users.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&RealtimeUser> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All tracked users, including stale ones.
    pub fn users(&self) -> impl Iterator<Item = &RealtimeUser> + '_ {
        self.users.values()
    }

    /// Fold an event into the set.
    ///
    /// Leaves remove the actor; every other kind upserts it and refreshes
    /// `last_seen`. Joins and leaves also evict stale entries.
    pub fn apply(&mut self, event: &RealtimeEvent, now: DateTime<Utc>) {
        match event.kind {
            EventKind::Leave => {
                self.users.remove(&event.user_id);
                self.prune_stale(now);
                return;
            }
            EventKind::Join => {
                self.prune_stale(now);
            }
            _ => {}
        }

        let user = self
            .users
            .entry(event.user_id.clone())
            .or_insert_with(|| RealtimeUser::placeholder(&event.user_id, event.timestamp));
        user.last_seen = event.timestamp;

        match event.kind {
            EventKind::Join => {
                if let Some(info) = event.join_info() {
                    user.name = info.name;
                    user.email = info.email;
                    user.current_page = info.page;
                }
            }
            EventKind::CursorMove => {
                if let Some(cursor) = event.cursor() {
                    user.cursor = Some(cursor);
                }
            }
            EventKind::Typing => {
                if let Some(typing) = event.typing() {
                    user.is_typing = Some(typing.is_typing);
                    user.typing_field = typing.field;
                }
            }
            _ => {}
        }
    }

    /// Users seen within the liveness window of `now`.
    pub fn online_users(&self, now: DateTime<Utc>) -> Vec<RealtimeUser> {
        online_users(self.users.values(), now, self.liveness_window)
    }

    /// Evict users not seen within the liveness window, returning their IDs.
    pub fn prune_stale(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let window = self.liveness_window;
        let stale: Vec<UserId> = self
            .users
            .values()
            .filter(|u| !u.is_live(now, window))
            .map(|u| u.id.clone())
            .collect();

        for id in &stale {
            self.users.remove(id);
        }

        stale
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
