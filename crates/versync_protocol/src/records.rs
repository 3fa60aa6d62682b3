//! Sync tasks, offline records and per-file sync status.

use crate::change::ChangeSet;
use crate::ids::{FileId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client platform a change originated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Desktop client.
    Desktop,
    /// Mobile client.
    Mobile,
    /// Browser client.
    #[default]
    Web,
}

impl Platform {
    /// Returns the lowercase platform name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Desktop => "desktop",
            Platform::Mobile => "mobile",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(Platform::Desktop),
            "mobile" => Ok(Platform::Mobile),
            "web" => Ok(Platform::Web),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// A request to commit a change set, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Task identifier.
    pub task_id: TaskId,
    /// Target file.
    pub file_id: FileId,
    /// Submitting user.
    pub user_id: UserId,
    /// Proposed edits.
    pub change_set: ChangeSet,
    /// Originating platform.
    pub platform: Platform,
    /// True if the change was captured while disconnected.
    pub offline: bool,
    /// When the task was created.
    pub enqueued_at: DateTime<Utc>,
}

impl SyncTask {
    /// Creates an online task stamped now.
    pub fn new(file_id: FileId, user_id: UserId, change_set: ChangeSet, platform: Platform) -> Self {
        Self {
            task_id: TaskId::generate(),
            file_id,
            user_id,
            change_set,
            platform,
            offline: false,
            enqueued_at: Utc::now(),
        }
    }

    /// Marks the task as originating from offline capture.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }
}

/// A change captured while disconnected, one slot per (file, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRecord {
    /// Target file.
    pub file_id: FileId,
    /// Owning user.
    pub user_id: UserId,
    /// Captured edits.
    pub change_set: ChangeSet,
    /// Platform the edit was captured on, when known.
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Capture time. Also identifies the slot's current contents.
    pub captured_at: DateTime<Utc>,
}

impl OfflineRecord {
    /// Creates a record stamped now.
    pub fn new(file_id: FileId, user_id: UserId, change_set: ChangeSet) -> Self {
        Self {
            file_id,
            user_id,
            change_set,
            platform: None,
            captured_at: Utc::now(),
        }
    }

    /// Sets the originating platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Builds the offline sync task that replays this record.
    pub fn to_task(&self) -> SyncTask {
        SyncTask::new(
            self.file_id.clone(),
            self.user_id.clone(),
            self.change_set.clone(),
            self.platform.unwrap_or_default(),
        )
        .offline()
    }
}

/// Sync state of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No task has been dispatched for the file.
    Idle,
    /// A task for the file is being processed.
    Syncing,
    /// The last task was committed.
    Synced,
    /// The last task conflicted and was dropped.
    Conflict,
    /// The last task exhausted its retries.
    Failed,
}

impl SyncState {
    /// Returns true while a task is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns true if a new task may start from this state.
    ///
    /// There is no terminal state: every settled state returns to
    /// `Syncing` when the next task for the file is dispatched.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        match next {
            SyncState::Syncing => self.can_start_sync(),
            SyncState::Synced | SyncState::Conflict | SyncState::Failed => self.is_active(),
            SyncState::Idle => false,
        }
    }

    /// Returns the lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
            SyncState::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sync-status row of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// File the row describes.
    pub file_id: FileId,
    /// Current state.
    pub status: SyncState,
    /// Time of the last successful commit.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// Returns the implicit row of a file nothing has touched yet.
    pub fn idle(file_id: FileId) -> Self {
        Self {
            file_id,
            status: SyncState::Idle,
            last_synced_at: None,
        }
    }

    /// Moves to `next`, stamping `last_synced_at` when it is `Synced`.
    pub fn advance(&mut self, next: SyncState, now: DateTime<Utc>) {
        self.status = next;
        if next == SyncState::Synced {
            self.last_synced_at = Some(now);
        }
    }
}
