//! Stored file versions and version comparison.

use crate::change::{ChangeSet, LineEdit};
use crate::ids::{FileId, UserId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form key/value metadata attached to a version.
pub type Metadata = BTreeMap<String, String>;

/// One immutable snapshot in a file's append-only history.
///
/// `change_set` is the cumulative set of line edits as of this version:
/// a version appended on top of another carries the union of the previous
/// edits and the newly accepted ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// File this version belongs to.
    pub file_id: FileId,
    /// Unique version identifier.
    pub version_id: VersionId,
    /// User whose change produced this version.
    pub author_id: UserId,
    /// Line edits as of this version.
    pub change_set: ChangeSet,
    /// Free-form metadata (platform, originating task, rollback source).
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl FileVersion {
    /// Creates a new version with a fresh id, stamped now.
    pub fn new(file_id: FileId, author_id: UserId, change_set: ChangeSet, metadata: Metadata) -> Self {
        Self {
            file_id,
            version_id: VersionId::generate(),
            author_id,
            change_set,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A line whose content differs between two versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    /// Line number.
    pub line: u32,
    /// Edit in the older version.
    pub before: LineEdit,
    /// Edit in the newer version.
    pub after: LineEdit,
}

/// Line-level difference between two versions of the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDiff {
    /// Version compared from.
    pub from: VersionId,
    /// Version compared to.
    pub to: VersionId,
    /// Lines present only in `to`.
    pub added: Vec<LineEdit>,
    /// Lines present only in `from`.
    pub removed: Vec<LineEdit>,
    /// Lines present in both with different edits.
    pub changed: Vec<LineChange>,
}

impl VersionDiff {
    /// Compares two versions line by line.
    pub fn between(from: &FileVersion, to: &FileVersion) -> Self {
        let old = from.change_set.by_line();
        let new = to.change_set.by_line();

        let mut added = Vec::new();
        let mut changed = Vec::new();
        for (line, after) in &new {
            match old.get(line) {
                None => added.push((*after).clone()),
                Some(before) if before != after => changed.push(LineChange {
                    line: *line,
                    before: (*before).clone(),
                    after: (*after).clone(),
                }),
                Some(_) => {}
            }
        }

        let removed = old
            .iter()
            .filter(|(line, _)| !new.contains_key(line))
            .map(|(_, edit)| (*edit).clone())
            .collect();

        Self {
            from: from.version_id,
            to: to.version_id,
            added,
            removed,
            changed,
        }
    }

    /// Returns true if both versions carry the same edits.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
