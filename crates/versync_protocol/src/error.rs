//! Error types for change-set validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when a change set or identifier is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The change set has no edits.
    #[error("change set is empty")]
    EmptyChangeSet,

    /// Line numbers are 1-based.
    #[error("invalid line number {line}: lines start at 1")]
    InvalidLine {
        /// The offending line number.
        line: u32,
    },

    /// The same line is edited twice in one change set.
    #[error("line {line} is edited more than once")]
    DuplicateLine {
        /// The duplicated line number.
        line: u32,
    },

    /// The change set exceeds the configured size limit.
    #[error("change set has {count} edits, limit is {max}")]
    TooManyEdits {
        /// Number of edits submitted.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An identifier is empty.
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),
}
