//! Error types for the realtime crate.

use crate::identity::UserId;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type alias for realtime session operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors that can occur while driving a realtime session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// No authenticated actor/tenant is installed on the session.
    #[error("No actor context installed on the session")]
    MissingContext,

    /// The session has been shut down and cannot be reused.
    #[error("Session has been shut down")]
    SessionClosed,

    /// The transport failed to connect or deliver an event.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The document is locked by another user.
    #[error("Document {document_id} is locked by {holder}")]
    LockHeld { document_id: String, holder: UserId },

    /// The caller tried to release a lock it does not hold.
    #[error("Document {0} is not locked by the current user")]
    LockNotHeld(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}
