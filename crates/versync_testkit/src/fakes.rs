//! Fake collaborators.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use versync_engine::{
    Action, Authorizer, CollaboratorError, EventSink, Insight, InsightGenerator, SyncEvent,
};
use versync_protocol::{ChangeSet, FileId, UserId};

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// Delivery target.
    pub target: UserId,
    /// Event type name.
    pub event_type: String,
    /// Payload.
    pub event: SyncEvent,
}

/// Event sink that records every delivery.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Vec<Recorded>>,
    fail: bool,
}

impl RecordingSink {
    /// Creates a sink that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that records every event but reports delivery failure.
    pub fn failing() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Returns every recorded delivery in order.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().clone()
    }

    /// Returns the payloads of one event type.
    pub fn of_type(&self, event_type: &str) -> Vec<SyncEvent> {
        self.recorded
            .lock()
            .iter()
            .filter(|r| r.event_type == event_type)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Counts the deliveries of one event type.
    pub fn count(&self, event_type: &str) -> usize {
        self.of_type(event_type).len()
    }
}

impl EventSink for RecordingSink {
    fn emit(
        &self,
        target: &UserId,
        event_type: &str,
        payload: &SyncEvent,
    ) -> Result<(), CollaboratorError> {
        self.recorded.lock().push(Recorded {
            target: target.clone(),
            event_type: event_type.to_string(),
            event: payload.clone(),
        });
        if self.fail {
            return Err(CollaboratorError("recipient offline".to_string()));
        }
        Ok(())
    }
}

/// Authorizer that only permits granted actions.
#[derive(Debug, Default)]
pub struct AllowList {
    any_file: Mutex<HashSet<(UserId, Action)>>,
    per_file: Mutex<HashSet<(UserId, FileId, Action)>>,
}

impl AllowList {
    /// Creates an allow-list that denies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits `action` on every file.
    pub fn grant(self, user_id: impl Into<UserId>, action: Action) -> Self {
        self.any_file.lock().insert((user_id.into(), action));
        self
    }

    /// Permits `action` on one file.
    pub fn grant_file(
        self,
        user_id: impl Into<UserId>,
        file_id: impl Into<FileId>,
        action: Action,
    ) -> Self {
        self.per_file
            .lock()
            .insert((user_id.into(), file_id.into(), action));
        self
    }
}

impl Authorizer for AllowList {
    fn check_permission(&self, user_id: &UserId, file_id: &FileId, action: Action) -> bool {
        self.any_file.lock().contains(&(user_id.clone(), action))
            || self
                .per_file
                .lock()
                .contains(&(user_id.clone(), file_id.clone(), action))
    }
}

/// Insight generator returning fixed suggestions and recording its input.
#[derive(Debug, Default)]
pub struct StaticInsights {
    suggestions: Vec<String>,
    calls: Mutex<Vec<ChangeSet>>,
}

impl StaticInsights {
    /// Creates a generator that always suggests `suggestions`.
    pub fn new<S: Into<String>>(suggestions: impl IntoIterator<Item = S>) -> Self {
        Self {
            suggestions: suggestions.into_iter().map(Into::into).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the change sets analyzed so far.
    pub fn calls(&self) -> Vec<ChangeSet> {
        self.calls.lock().clone()
    }
}

impl InsightGenerator for StaticInsights {
    fn analyze(&self, change_set: &ChangeSet) -> Result<Insight, CollaboratorError> {
        self.calls.lock().push(change_set.clone());
        Ok(Insight {
            summary: format!("{} conflicted lines", change_set.len()),
            suggestions: self.suggestions.clone(),
        })
    }
}

/// Insight generator that blocks before answering.
#[derive(Debug, Clone, Copy)]
pub struct SlowInsights {
    delay: Duration,
}

impl SlowInsights {
    /// Creates a generator that sleeps for `delay` on every call.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl InsightGenerator for SlowInsights {
    fn analyze(&self, _change_set: &ChangeSet) -> Result<Insight, CollaboratorError> {
        std::thread::sleep(self.delay);
        Ok(Insight {
            summary: "slow".to_string(),
            suggestions: vec!["late suggestion".to_string()],
        })
    }
}
