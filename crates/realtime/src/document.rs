//! Collaborative document editing on top of a realtime session.
//!
//! [`DocumentCollaboration`] scopes broadcasts to one document and adds an
//! edit lock. The lock is a lease that expires on its own; see
//! [`crate::lock`] for how concurrent claims converge.

use crate::error::RealtimeResult;
use crate::event::EventKind;
use crate::identity::{ResourceRef, UserId};
use crate::lock::{DocumentLock, LockAction};
use crate::presence::RealtimeUser;
use crate::session::{RealtimeSession, SentEvent};
use crate::state::current_lock;
use crate::transport::Connector;
use serde_json::Value;
use tracing::{info, warn};

/// Resource type used for documents.
pub const DOCUMENT_RESOURCE_TYPE: &str = "document";

/// Collaboration handle for a single document.
pub struct DocumentCollaboration<C: Connector> {
    session: RealtimeSession<C>,
    document: ResourceRef,
}

impl<C: Connector> Clone for DocumentCollaboration<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            document: self.document.clone(),
        }
    }
}

impl<C: Connector> DocumentCollaboration<C> {
    pub fn new(session: RealtimeSession<C>, document_id: impl Into<String>) -> Self {
        Self {
            session,
            document: ResourceRef::new(DOCUMENT_RESOURCE_TYPE, document_id),
        }
    }

    pub fn session(&self) -> &RealtimeSession<C> {
        &self.session
    }

    pub fn document_id(&self) -> &str {
        &self.document.resource_id
    }

    /// Broadcast an edit to this document.
    pub async fn broadcast_edit(
        &self,
        change_type: &str,
        data: Value,
    ) -> RealtimeResult<Option<SentEvent>> {
        self.session
            .broadcast_data_change(&self.document, change_type, data)
            .await
    }

    /// Take or renew the edit lock.
    ///
    /// Fails with `LockHeld` while another user holds an unexpired lease.
    pub async fn lock_document(&self) -> RealtimeResult<DocumentLock> {
        let actor = self.session.actor()?;
        let now = self.session.now();
        let lease = self.session.config().lock_lease;

        let (lock, previous) = self.session.with_state(|state| {
            let locks = state.locks_mut();
            let previous = locks.entry(self.document_id()).cloned();
            locks
                .try_acquire(self.document_id(), actor.user_id(), now, lease)
                .map(|lock| (lock, previous))
        })?;

        let payload = serde_json::to_value(LockAction::for_lock(&lock))?;
        if let Err(e) = self
            .session
            .send_event_for(EventKind::Collaboration, payload, &self.document)
            .await
        {
            warn!(document = %self.document_id(), error = %e, "lock claim not delivered, rolling back");
            self.session.with_state(|state| {
                state
                    .locks_mut()
                    .restore(self.document_id(), Some(&lock), previous)
            });
            return Err(e);
        }

        info!(document = %self.document_id(), holder = %lock.holder, "document locked");
        Ok(lock)
    }

    /// Release the edit lock held by the local user.
    pub async fn unlock_document(&self) -> RealtimeResult<()> {
        let actor = self.session.actor()?;
        let now = self.session.now();

        let released = self.session.with_state(|state| {
            state
                .locks_mut()
                .release(self.document_id(), actor.user_id(), now)
        })?;

        let payload = serde_json::to_value(LockAction::Unlock {
            document_id: self.document_id().to_string(),
        })?;
        if let Err(e) = self
            .session
            .send_event_for(EventKind::Collaboration, payload, &self.document)
            .await
        {
            warn!(document = %self.document_id(), error = %e, "unlock not delivered, keeping lease");
            self.session.with_state(|state| {
                state
                    .locks_mut()
                    .restore(self.document_id(), None, Some(released))
            });
            return Err(e);
        }

        info!(document = %self.document_id(), "document unlocked");
        Ok(())
    }

    /// The current lease, if unexpired.
    pub fn current_lock(&self) -> Option<DocumentLock> {
        let now = self.session.now();
        self.session
            .with_state(|state| current_lock(state, self.document_id(), now))
    }

    pub fn lock_holder(&self) -> Option<UserId> {
        self.current_lock().map(|lock| lock.holder)
    }

    pub fn is_locked(&self) -> bool {
        self.current_lock().is_some()
    }

    /// Whether the local user may edit: the document is unlocked or locked by them.
    pub fn can_edit(&self) -> bool {
        let Some(actor) = self.session.context() else {
            return false;
        };
        match self.lock_holder() {
            Some(holder) => holder == *actor.user_id(),
            None => true,
        }
    }

    /// Online users who touched this document.
    pub fn active_editors(&self) -> Vec<RealtimeUser> {
        let document_id = self.document_id();
        let editors: Vec<UserId> = self.session.with_state(|state| {
            state
                .events()
                .iter()
                .filter(|e| e.resource_id.as_deref() == Some(document_id))
                .map(|e| e.user_id.clone())
                .collect()
        });
        self.session
            .online_users()
            .into_iter()
            .filter(|user| editors.contains(&user.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SessionConfig;
    use crate::error::RealtimeError;
    use crate::event::RealtimeEvent;
    use crate::identity::{ActorContext, UserIdentity};
    use crate::transport::MemoryConnector;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn alice() -> ActorContext {
        ActorContext::new(UserIdentity::new("user-1", "Alice", "alice@example.com"), "acme")
    }

    fn bob() -> ActorContext {
        ActorContext::new(UserIdentity::new("user-2", "Bob", "bob@example.com"), "acme")
    }

    fn document(clock: Arc<ManualClock>) -> (MemoryConnector, DocumentCollaboration<MemoryConnector>) {
        let connector = MemoryConnector::new();
        let session = RealtimeSession::builder(connector.clone())
            .context(alice())
            .config(SessionConfig::default())
            .clock(clock)
            .build();
        (connector, DocumentCollaboration::new(session, "doc-1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_and_unlock() {
        let clock = Arc::new(ManualClock::starting_now());
        let (connector, doc) = document(clock);
        doc.session().connect().await.unwrap();

        assert!(!doc.is_locked());
        let lock = doc.lock_document().await.unwrap();
        assert_eq!(lock.holder, *alice().user_id());
        assert!(doc.is_locked());
        assert!(doc.can_edit());
        assert_eq!(connector.sent_count(EventKind::Collaboration), 1);

        doc.unlock_document().await.unwrap();
        assert!(!doc.is_locked());
        assert_eq!(connector.sent_count(EventKind::Collaboration), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_lock_blocks_local_user() {
        let clock = Arc::new(ManualClock::starting_now());
        let (connector, doc) = document(clock.clone());
        doc.session().connect().await.unwrap();

        let now = clock.now();
        let claim = LockAction::Lock {
            document_id: "doc-1".to_string(),
            acquired_at: now,
            expires_at: now + Duration::minutes(2),
        };
        connector.inject(RealtimeEvent::new(
            EventKind::Collaboration,
            &bob(),
            now,
            serde_json::to_value(&claim).unwrap(),
        ));
        tokio::task::yield_now().await;

        assert_eq!(doc.lock_holder(), Some(bob().user_id().clone()));
        assert!(!doc.can_edit());
        assert!(matches!(
            doc.lock_document().await,
            Err(RealtimeError::LockHeld { .. })
        ));
        assert_eq!(
            doc.unlock_document().await,
            Err(RealtimeError::LockNotHeld("doc-1".to_string()))
        );

        clock.advance(Duration::minutes(3));
        assert!(!doc.is_locked());
        assert!(doc.can_edit());
        assert!(doc.lock_document().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_lock_is_rolled_back() {
        let clock = Arc::new(ManualClock::starting_now());
        let (connector, doc) = document(clock);
        doc.session().connect().await.unwrap();
        connector.reject_sends(true);

        assert!(matches!(
            doc.lock_document().await,
            Err(RealtimeError::Transport(_))
        ));
        assert!(!doc.is_locked());
        assert_eq!(connector.sent_count(EventKind::Collaboration), 0);
        assert!(doc.session().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_unlock_keeps_lease() {
        let clock = Arc::new(ManualClock::starting_now());
        let (connector, doc) = document(clock);
        doc.session().connect().await.unwrap();
        let lock = doc.lock_document().await.unwrap();

        connector.reject_sends(true);
        assert!(matches!(
            doc.unlock_document().await,
            Err(RealtimeError::Transport(_))
        ));
        assert_eq!(doc.current_lock(), Some(lock));
        assert_eq!(connector.sent_count(EventKind::Collaboration), 1);

        connector.reject_sends(false);
        doc.unlock_document().await.unwrap();
        assert!(!doc.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_edit_targets_document() {
        let clock = Arc::new(ManualClock::starting_now());
        let (_connector, doc) = document(clock);

        let sent = doc
            .broadcast_edit("insert", json!({"text": "hello"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.event.resource_type.as_deref(), Some("document"));
        assert_eq!(sent.event.resource_id.as_deref(), Some("doc-1"));
        assert_eq!(doc.active_editors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_requires_context() {
        let session = RealtimeSession::builder(MemoryConnector::new()).build();
        let doc = DocumentCollaboration::new(session, "doc-1");
        assert_eq!(doc.lock_document().await, Err(RealtimeError::MissingContext));
        assert!(!doc.can_edit());
    }
}
