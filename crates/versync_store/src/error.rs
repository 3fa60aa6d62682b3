//! Error types for storage operations.

use std::io;
use std::time::Duration;
use thiserror::Error;
use versync_protocol::{FileId, VersionId};

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another append won the race for this file.
    #[error("stale append on {file_id}: expected previous {expected:?}, found {actual:?}")]
    Stale {
        /// The file being appended to.
        file_id: FileId,
        /// The previous version the caller expected.
        expected: Option<VersionId>,
        /// The actual latest version.
        actual: Option<VersionId>,
    },

    /// A requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A call exceeded its time budget.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted data could not be interpreted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process owns the store directory.
    #[error("store directory is locked by another process")]
    Locked,

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }

    /// Creates a corrupted error.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        StoreError::Corrupted(msg.into())
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::unavailable("down").is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(3)).is_transient());
        assert!(StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_transient());

        assert!(!StoreError::corrupted("bad line").is_transient());
        assert!(!StoreError::Locked.is_transient());
        assert!(!StoreError::Stale {
            file_id: FileId::new("f"),
            expected: None,
            actual: Some(VersionId::generate()),
        }
        .is_transient());
    }
}
