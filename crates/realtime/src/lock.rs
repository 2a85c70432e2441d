//! Document edit locks.
//!
//! A lock is a lease: it names one holder and expires on its own. Claims are
//! published as `collaboration` events so every peer folds the same claims
//! into its own table. When two peers claim the same document concurrently the
//! earlier `acquired_at` wins, with the smaller user ID breaking ties, so all
//! peers converge on the same holder.

use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{EventKind, RealtimeEvent};
use crate::identity::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default lease length for a document lock.
pub fn default_lock_lease() -> Duration {
    Duration::minutes(2)
}

/// A lease on a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLock {
    pub document_id: String,
    pub holder: UserId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DocumentLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this claim takes precedence over `other`.
    pub fn precedes(&self, other: &DocumentLock) -> bool {
        (self.acquired_at, &self.holder) < (other.acquired_at, &other.holder)
    }
}

/// Lock claims as carried in a `collaboration` event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LockAction {
    Lock {
        #[serde(rename = "documentId")]
        document_id: String,
        #[serde(rename = "acquiredAt")]
        acquired_at: DateTime<Utc>,
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
    },
    Unlock {
        #[serde(rename = "documentId")]
        document_id: String,
    },
}

impl LockAction {
    pub fn for_lock(lock: &DocumentLock) -> Self {
        LockAction::Lock {
            document_id: lock.document_id.clone(),
            acquired_at: lock.acquired_at,
            expires_at: lock.expires_at,
        }
    }
}

/// Current lock per document.
#[derive(Clone, Debug, Default)]
pub struct LockTable {
    locks: HashMap<String, DocumentLock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unexpired lock on `document_id`, if any.
    pub fn current(&self, document_id: &str, now: DateTime<Utc>) -> Option<&DocumentLock> {
        self.locks
            .get(document_id)
            .filter(|lock| !lock.is_expired(now))
    }

    /// Acquire or renew a lease for `holder`.
    pub fn try_acquire(
        &mut self,
        document_id: &str,
        holder: &UserId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> RealtimeResult<DocumentLock> {
        let acquired_at = match self.current(document_id, now) {
            Some(lock) if lock.holder != *holder => {
                return Err(RealtimeError::LockHeld {
                    document_id: document_id.to_string(),
                    holder: lock.holder.clone(),
                });
            }
            // Renewal keeps the original claim time so precedence is stable
            Some(lock) => lock.acquired_at,
            None => now,
        };

        let lock = DocumentLock {
            document_id: document_id.to_string(),
            holder: holder.clone(),
            acquired_at,
            expires_at: now + lease,
        };
        self.locks.insert(document_id.to_string(), lock.clone());
        Ok(lock)
    }

    /// Release a lease held by `holder`.
    pub fn release(
        &mut self,
        document_id: &str,
        holder: &UserId,
        now: DateTime<Utc>,
    ) -> RealtimeResult<DocumentLock> {
        match self.current(document_id, now) {
            Some(lock) if lock.holder == *holder => {}
            _ => return Err(RealtimeError::LockNotHeld(document_id.to_string())),
        }
        self.locks
            .remove(document_id)
            .ok_or_else(|| RealtimeError::LockNotHeld(document_id.to_string()))
    }

    /// The stored lease on `document_id`, expired or not.
    pub fn entry(&self, document_id: &str) -> Option<&DocumentLock> {
        self.locks.get(document_id)
    }

    /// Put back `previous` if the entry for `document_id` is still `expected`.
    ///
    /// Used to undo a local claim or release that peers never saw. Returns
    /// `false` when something else changed the entry in the meantime.
    pub fn restore(
        &mut self,
        document_id: &str,
        expected: Option<&DocumentLock>,
        previous: Option<DocumentLock>,
    ) -> bool {
        if self.locks.get(document_id) != expected {
            return false;
        }
        match previous {
            Some(lock) => self.locks.insert(document_id.to_string(), lock),
            None => self.locks.remove(document_id),
        };
        true
    }

    /// Fold a `collaboration` event carrying a lock claim into the table.
    ///
    /// Returns `true` if the table changed.
    pub fn apply(&mut self, event: &RealtimeEvent, now: DateTime<Utc>) -> bool {
        if event.kind != EventKind::Collaboration {
            return false;
        }
        let Ok(action) = event.payload_as::<LockAction>() else {
            return false;
        };

        match action {
            LockAction::Lock {
                document_id,
                acquired_at,
                expires_at,
            } => {
                let claim = DocumentLock {
                    document_id: document_id.clone(),
                    holder: event.user_id.clone(),
                    acquired_at,
                    expires_at,
                };
                if claim.is_expired(now) {
                    return false;
                }
                if let Some(existing) = self.current(&document_id, now) {
                    if existing.holder != claim.holder && existing.precedes(&claim) {
                        return false;
                    }
                }
                self.locks.insert(document_id, claim);
                true
            }
            LockAction::Unlock { document_id } => {
                let held_by_sender = self
                    .locks
                    .get(&document_id)
                    .is_some_and(|lock| lock.holder == event.user_id);
                if held_by_sender {
                    self.locks.remove(&document_id);
                }
                held_by_sender
            }
        }
    }

    /// Drop expired leases.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.locks.retain(|_, lock| !lock.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
