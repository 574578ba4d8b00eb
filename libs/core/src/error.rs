use crate::coordinator::RebuildSession;
use crate::models::{DocumentId, DocumentState};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown document: {0}")]
    UnknownDocument(DocumentId),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: DocumentId,
        from: DocumentState,
        to: DocumentState,
    },
}

#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    /// Carries the session that is already in flight so callers can attach to it.
    #[error("rebuild {} is already running", .0.id())]
    AlreadyRunning(RebuildSession),

    #[error("no rebuild is running")]
    NotRunning,

    #[error("session mismatch: active={active_session_id}, requested={requested_session_id}")]
    SessionMismatch {
        active_session_id: Uuid,
        requested_session_id: Uuid,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("document enumeration failed: {0}")]
    Enumeration(String),
}
