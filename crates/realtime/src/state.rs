//! Collaboration state owned by a realtime session.
//!
//! Tracks:
//! - Connection status (Connected, Disconnected, Reconnecting)
//! - The active-user set
//! - The bounded event log
//! - Document locks seen on the channel

use crate::event::RealtimeEvent;
use crate::event_log::EventLog;
use crate::identity::UserId;
use crate::lock::{DocumentLock, LockTable};
use crate::presence::{PresenceTracker, RealtimeUser};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Connection status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connected to the channel
    Connected,
    /// No connection
    #[default]
    Disconnected,
    /// A connection attempt is in flight
    Reconnecting,
}

impl ConnectionStatus {
    /// Human-readable label for status bars.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Reconnecting => "Reconnecting...",
        }
    }
}

/// Aggregate state of one collaboration session.
#[derive(Clone, Debug)]
pub struct CollaborationState {
    presence: PresenceTracker,
    events: EventLog,
    locks: LockTable,
    status: ConnectionStatus,
}

impl CollaborationState {
    pub fn new(liveness_window: Duration, event_log_capacity: usize) -> Self {
        Self {
            presence: PresenceTracker::with_liveness_window(liveness_window),
            events: EventLog::with_capacity(event_log_capacity),
            locks: LockTable::new(),
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceTracker {
        &mut self.presence
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn locks_mut(&mut self) -> &mut LockTable {
        &mut self.locks
    }

    /// Record an event: append it to the log and fold it into presence and locks.
    pub fn record(&mut self, event: RealtimeEvent, now: DateTime<Utc>) {
        self.presence.apply(&event, now);
        self.locks.apply(&event, now);
        self.events.push(event);
    }

    /// Like [`record`](Self::record), but leaves presence untouched.
    pub fn record_untracked(&mut self, event: RealtimeEvent, now: DateTime<Utc>) {
        self.locks.apply(&event, now);
        self.events.push(event);
    }

    /// Remove a user from the active set.
    pub fn remove_user(&mut self, user_id: &UserId) -> Option<RealtimeUser> {
        self.presence.remove(user_id)
    }

    /// Capture an owned copy of the state.
    pub fn snapshot(&self) -> CollaborationSnapshot {
        let mut active_users: Vec<RealtimeUser> = self.presence.users().cloned().collect();
        active_users.sort_by(|a, b| a.id.cmp(&b.id));
        CollaborationSnapshot {
            active_users,
            recent_events: self.events.to_vec(),
            is_connected: self.is_connected(),
            connection_status: self.status,
            liveness_window: self.presence.liveness_window(),
        }
    }
}

/// Owned copy of a session's state for rendering and tests.
#[derive(Clone, Debug)]
pub struct CollaborationSnapshot {
    /// Active users ordered by ID
    pub active_users: Vec<RealtimeUser>,
    /// Recent events, oldest first
    pub recent_events: Vec<RealtimeEvent>,
    pub is_connected: bool,
    pub connection_status: ConnectionStatus,
    pub liveness_window: Duration,
}

impl CollaborationSnapshot {
    /// Users seen within the liveness window of `now`.
    pub fn online_users(&self, now: DateTime<Utc>) -> Vec<RealtimeUser> {
        crate::presence::online_users(&self.active_users, now, self.liveness_window)
    }

    pub fn last_event(&self) -> Option<&RealtimeEvent> {
        self.recent_events.last()
    }
}

/// Current unexpired lock on a document.
pub fn current_lock(state: &CollaborationState, document_id: &str, now: DateTime<Utc>) -> Option<DocumentLock> {
    state.locks.current(document_id, now).cloned()
}
