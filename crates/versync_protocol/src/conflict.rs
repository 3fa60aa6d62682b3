//! Conflict detection and merge views.

use crate::change::{ChangeSet, LineEdit};
use serde::{Deserialize, Serialize};

/// Returns the lines where `incoming` and `latest` disagree, ascending.
///
/// A line conflicts iff both sides edit it with different content. Lines
/// only `incoming` touches are additions; identical content is an
/// idempotent resubmission.
pub fn conflicting_lines(latest: &ChangeSet, incoming: &ChangeSet) -> Vec<u32> {
    let index = latest.by_line();
    let mut lines: Vec<u32> = incoming
        .iter()
        .filter(|edit| {
            index
                .get(&edit.line)
                .is_some_and(|ours| ours.content != edit.content)
        })
        .map(|edit| edit.line)
        .collect();
    lines.sort_unstable();
    lines.dedup();
    lines
}

/// Returns true if `incoming` conflicts with `latest`.
pub fn detect(latest: &ChangeSet, incoming: &ChangeSet) -> bool {
    let index = latest.by_line();
    incoming.iter().any(|edit| {
        index
            .get(&edit.line)
            .is_some_and(|ours| ours.content != edit.content)
    })
}

/// Returns true if committing `incoming` on top of `latest` changes nothing.
pub fn is_duplicate(latest: &ChangeSet, incoming: &ChangeSet) -> bool {
    latest.contains_all(incoming)
}

/// One line of the merged view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergedLine {
    /// Only the incoming change set edits this line.
    Yours(LineEdit),
    /// Only the stored version edits this line.
    Theirs(LineEdit),
    /// Both sides carry the same content.
    Shared(LineEdit),
    /// Both sides edit the line with different content.
    Conflict {
        /// Line number.
        line: u32,
        /// The incoming edit.
        yours: LineEdit,
        /// The stored edit.
        theirs: LineEdit,
    },
}

impl MergedLine {
    /// Returns the line number.
    pub fn line(&self) -> u32 {
        match self {
            MergedLine::Yours(edit) | MergedLine::Theirs(edit) | MergedLine::Shared(edit) => {
                edit.line
            }
            MergedLine::Conflict { line, .. } => *line,
        }
    }

    /// Returns true for a conflict marker.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergedLine::Conflict { .. })
    }
}

/// The views offered to a caller whose change set clashed with the latest version.
///
/// Never persisted. The resolution never picks a winner: the caller chooses
/// a view (or resolves each marker of the merged view) and resubmits the
/// result as a new sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// True if at least one line conflicts.
    pub conflict: bool,
    /// The incoming change set ("keep yours").
    pub your_changes: ChangeSet,
    /// The stored change set ("use other").
    pub their_changes: ChangeSet,
    /// Union of both sides, ordered by line, with conflict markers.
    pub merged_changes: Vec<MergedLine>,
    /// Best-effort content suggestions for the conflicted lines.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ConflictResolution {
    /// A resolution for a change set that does not conflict.
    pub fn clean(incoming: ChangeSet) -> Self {
        Self {
            conflict: false,
            your_changes: incoming,
            their_changes: ChangeSet::default(),
            merged_changes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Builds the three views for `incoming` against `latest`.
    pub fn build(latest: &ChangeSet, incoming: &ChangeSet) -> Self {
        let ours = incoming.by_line();
        let theirs = latest.by_line();

        let mut lines: Vec<u32> = ours.keys().chain(theirs.keys()).copied().collect();
        lines.sort_unstable();
        lines.dedup();

        let merged_changes: Vec<MergedLine> = lines
            .into_iter()
            .filter_map(|line| match (ours.get(&line), theirs.get(&line)) {
                (Some(yours), None) => Some(MergedLine::Yours((*yours).clone())),
                (None, Some(stored)) => Some(MergedLine::Theirs((*stored).clone())),
                (Some(yours), Some(stored)) if yours.content == stored.content => {
                    Some(MergedLine::Shared((*yours).clone()))
                }
                (Some(yours), Some(stored)) => Some(MergedLine::Conflict {
                    line,
                    yours: (*yours).clone(),
                    theirs: (*stored).clone(),
                }),
                (None, None) => None,
            })
            .collect();

        Self {
            conflict: merged_changes.iter().any(MergedLine::is_conflict),
            your_changes: incoming.clone(),
            their_changes: latest.clone(),
            merged_changes,
            suggestions: Vec::new(),
        }
    }

    /// Attaches content suggestions.
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Returns the conflicted line numbers, ascending.
    pub fn conflicted_lines(&self) -> Vec<u32> {
        self.merged_changes
            .iter()
            .filter(|line| line.is_conflict())
            .map(MergedLine::line)
            .collect()
    }

    /// The change set to resubmit when keeping the incoming edits.
    pub fn keep_yours(&self) -> ChangeSet {
        self.your_changes.clone()
    }

    /// The change set to resubmit when accepting the stored edits.
    pub fn use_theirs(&self) -> ChangeSet {
        self.their_changes.clone()
    }

    /// Flattens the merged view, asking `pick` to settle every conflict marker.
    pub fn merged_with<F>(&self, mut pick: F) -> ChangeSet
    where
        F: FnMut(u32, &LineEdit, &LineEdit) -> LineEdit,
    {
        self.merged_changes
            .iter()
            .map(|merged| match merged {
                MergedLine::Yours(edit) | MergedLine::Theirs(edit) | MergedLine::Shared(edit) => {
                    edit.clone()
                }
                MergedLine::Conflict {
                    line,
                    yours,
                    theirs,
                } => pick(*line, yours, theirs),
            })
            .collect()
    }
}
