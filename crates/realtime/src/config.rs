//! Session configuration.

use crate::event_log::DEFAULT_EVENT_LOG_CAPACITY;
use crate::identity::ResourceRef;
use crate::lock::default_lock_lease;
use crate::presence::default_liveness_window;
use std::time::Duration;

/// Configuration for a realtime session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Track presence and announce the actor with a join event
    pub enable_presence: bool,
    /// Allow cursor, typing and data-change broadcasts
    pub enable_collaboration: bool,
    /// Retry failed or lost connections
    pub auto_reconnect: bool,
    /// Delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Interval between keep-alive pings
    pub heartbeat_interval: Duration,
    /// How long a user stays online without activity
    pub liveness_window: chrono::Duration,
    /// Number of recent events retained
    pub event_log_capacity: usize,
    /// Lease length for document locks
    pub lock_lease: chrono::Duration,
    /// Resource the session collaborates on
    pub resource: Option<ResourceRef>,
    /// Page label announced on join
    pub current_page: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_presence: true,
            enable_collaboration: true,
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            liveness_window: default_liveness_window(),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            lock_lease: default_lock_lease(),
            resource: None,
            current_page: None,
        }
    }
}

impl SessionConfig {
    /// Create a config scoped to a resource.
    pub fn for_resource(resource: ResourceRef) -> Self {
        Self {
            resource: Some(resource),
            ..Default::default()
        }
    }

    pub fn with_presence(mut self, enabled: bool) -> Self {
        self.enable_presence = enabled;
        self
    }

    pub fn with_collaboration(mut self, enabled: bool) -> Self {
        self.enable_collaboration = enabled;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_liveness_window(mut self, window: chrono::Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    pub fn with_lock_lease(mut self, lease: chrono::Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_current_page(mut self, page: impl Into<String>) -> Self {
        self.current_page = Some(page.into());
        self
    }
}
