//! Error types for the sync engine.

use crate::collab::{Action, CollaboratorError};
use std::time::Duration;
use thiserror::Error;
use versync_protocol::{ConflictResolution, FileId, ProtocolError, UserId};
use versync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A file, version, offline record or dead letter does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authorization collaborator denied the action.
    #[error("user {user_id} may not {action} {file_id}")]
    PermissionDenied {
        /// The acting user.
        user_id: UserId,
        /// The target file.
        file_id: FileId,
        /// The denied action.
        action: Action,
    },

    /// Another append won the race for this file.
    ///
    /// Recovered inside the dispatcher by re-running conflict detection.
    #[error("stale version for {file_id}")]
    StaleVersion {
        /// The contended file.
        file_id: FileId,
    },

    /// The change set clashes with the latest version.
    #[error("conflict on lines {:?}", .0.conflicted_lines())]
    Conflict(Box<ConflictResolution>),

    /// The store was unavailable.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// A store call did not finish within its time budget.
    ///
    /// The call may still be running on the blocking pool.
    #[error("store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The store failed in a way retrying will not fix.
    #[error("store error: {0}")]
    Store(String),

    /// The request is malformed.
    #[error("validation error: {0}")]
    Validation(#[from] ProtocolError),

    /// A best-effort collaborator failed.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// The dispatcher has stopped.
    #[error("sync queue is closed")]
    QueueClosed,

    /// The task was cancelled before dispatch.
    #[error("task cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound(what.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientStore(_)
                | SyncError::StoreTimeout(_)
                | SyncError::StaleVersion { .. }
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Stale { file_id, .. } => SyncError::StaleVersion { file_id },
            StoreError::NotFound(what) => SyncError::NotFound(what),
            StoreError::Timeout(limit) => SyncError::StoreTimeout(limit),
            err if err.is_transient() => SyncError::TransientStore(err.to_string()),
            err => SyncError::Store(err.to_string()),
        }
    }
}
