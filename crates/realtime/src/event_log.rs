//! Bounded history of recent realtime events.

use crate::event::{EventKind, RealtimeEvent};
use std::collections::VecDeque;

/// Default number of events retained.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// Append-only ring buffer of events, oldest evicted first.
#[derive(Clone, Debug)]
pub struct EventLog {
    events: VecDeque<RealtimeEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }

    /// Create a log holding at most `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, evicting the oldest ones past capacity.
    ///
    /// Returns how many events were evicted.
    pub fn push(&mut self, event: RealtimeEvent) -> usize {
        self.events.push_back(event);
        let mut evicted = 0;
        while self.events.len() > self.capacity {
            self.events.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest retained event.
    pub fn first(&self) -> Option<&RealtimeEvent> {
        self.events.front()
    }

    /// Most recent event.
    pub fn last(&self) -> Option<&RealtimeEvent> {
        self.events.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RealtimeEvent> + '_ {
        self.events.iter()
    }

    /// Events of a single kind, oldest to newest.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &RealtimeEvent> + '_ {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    /// Copy of the retained events, oldest first.
    pub fn to_vec(&self) -> Vec<RealtimeEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ActorContext, UserIdentity};
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    fn event(n: usize) -> RealtimeEvent {
        let actor = ActorContext::new(UserIdentity::new("user-1", "Alice", "a@example.com"), "acme");
        RealtimeEvent::new(EventKind::DataChange, &actor, Utc::now(), json!({ "n": n }))
    }

    #[test]
    fn test_event_log_default_capacity() {
        let log = EventLog::new();
        assert_eq!(log.capacity(), 100);
        assert!(log.is_empty());
    }

    #[test]
    fn test_event_log_evicts_oldest_first() {
        let mut log = EventLog::new();
        for n in 1..=101 {
            log.push(event(n));
        }

        assert_eq!(log.len(), 100);
        assert_eq!(log.first().unwrap().payload["n"], 2);
        assert_eq!(log.last().unwrap().payload["n"], 101);
    }

    #[test]
    fn test_event_log_push_reports_evictions() {
        let mut log = EventLog::with_capacity(2);
        assert_eq!(log.push(event(1)), 0);
        assert_eq!(log.push(event(2)), 0);
        assert_eq!(log.push(event(3)), 1);
    }

    #[test]
    fn test_event_log_zero_capacity_clamped() {
        let mut log = EventLog::with_capacity(0);
        log.push(event(1));
        log.push(event(2));
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().payload["n"], 2);
    }

    #[test]
    fn test_event_log_of_kind() {
        let actor = ActorContext::new(UserIdentity::new("user-1", "Alice", "a@example.com"), "acme");
        let mut log = EventLog::new();
        log.push(event(1));
        log.push(RealtimeEvent::new(EventKind::Ping, &actor, Utc::now(), json!({})));
        log.push(event(2));

        assert_eq!(log.of_kind(EventKind::Ping).count(), 1);
        assert_eq!(log.of_kind(EventKind::DataChange).count(), 2);
    }

    proptest! {
        #[test]
        fn prop_log_never_exceeds_capacity(capacity in 1usize..50, pushes in 0usize..200) {
            let mut log = EventLog::with_capacity(capacity);
            for n in 0..pushes {
                log.push(event(n));
                prop_assert!(log.len() <= capacity);
            }
            prop_assert_eq!(log.len(), pushes.min(capacity));
            if pushes > 0 {
                let first = pushes.saturating_sub(capacity);
                prop_assert_eq!(log.first().unwrap().payload["n"].as_u64(), Some(first as u64));
            }
        }
    }
}
