//! External collaborators consumed by the engine.
//!
//! The engine only relies on the yes/no and emit contracts below; policy
//! evaluation, insight generation and push delivery live elsewhere.

use crate::events::SyncEvent;
use std::fmt;
use thiserror::Error;
use versync_protocol::{ChangeSet, FileId, UserId};

/// An action checked against the authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Reading versions or status.
    Read,
    /// Appending versions or buffering offline edits.
    Write,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Write => "write",
        })
    }
}

/// Error reported by a best-effort collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

/// Decides whether a user may act on a file.
pub trait Authorizer: Send + Sync {
    /// Returns true if `user_id` may perform `action` on `file_id`.
    fn check_permission(&self, user_id: &UserId, file_id: &FileId, action: Action) -> bool;
}

/// Authorizer that permits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn check_permission(&self, _user_id: &UserId, _file_id: &FileId, _action: Action) -> bool {
        true
    }
}

/// Output of the content-insight generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Insight {
    /// Short description of the analyzed edits.
    pub summary: String,
    /// Suggested contents.
    pub suggestions: Vec<String>,
}

/// Best-effort analysis of change sets.
///
/// Called on the blocking pool under a timeout; an implementation may block.
pub trait InsightGenerator: Send + Sync {
    /// Analyzes a change set.
    fn analyze(&self, change_set: &ChangeSet) -> Result<Insight, CollaboratorError>;
}

/// Insight generator that never suggests anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInsights;

impl InsightGenerator for NoInsights {
    fn analyze(&self, _change_set: &ChangeSet) -> Result<Insight, CollaboratorError> {
        Ok(Insight::default())
    }
}

/// Real-time delivery of sync events.
///
/// At-most-once; the engine never waits for confirmation and never
/// retries. Called from the event forwarder task, so it must not block.
pub trait EventSink: Send + Sync {
    /// Delivers `payload` to `target`.
    fn emit(
        &self,
        target: &UserId,
        event_type: &str,
        payload: &SyncEvent,
    ) -> Result<(), CollaboratorError>;
}

/// Event sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(
        &self,
        _target: &UserId,
        _event_type: &str,
        _payload: &SyncEvent,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
