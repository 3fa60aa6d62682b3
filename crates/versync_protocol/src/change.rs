//! Line-level edits and change sets.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Kind of line edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    /// A new line was inserted.
    Insert,
    /// An existing line was rewritten.
    Update,
    /// A line was removed.
    Delete,
}

impl EditOp {
    /// Returns the lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOp::Insert => "insert",
            EditOp::Update => "update",
            EditOp::Delete => "delete",
        }
    }
}

/// One edit to one line of a file.
///
/// Lines are 1-based. A delete carries the content the author saw when
/// deleting (usually empty); it is compared like any other content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineEdit {
    /// Target line (1-based).
    pub line: u32,
    /// Line content after the edit.
    pub content: String,
    /// Edit kind.
    pub op: EditOp,
}

impl LineEdit {
    /// Creates an edit.
    pub fn new(line: u32, content: impl Into<String>, op: EditOp) -> Self {
        Self {
            line,
            content: content.into(),
            op,
        }
    }

    /// Creates an insert edit.
    pub fn insert(line: u32, content: impl Into<String>) -> Self {
        Self::new(line, content, EditOp::Insert)
    }

    /// Creates an update edit.
    pub fn update(line: u32, content: impl Into<String>) -> Self {
        Self::new(line, content, EditOp::Update)
    }

    /// Creates a delete edit with empty content.
    pub fn delete(line: u32) -> Self {
        Self::new(line, String::new(), EditOp::Delete)
    }
}

/// An ordered list of line edits describing one proposed modification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(Vec<LineEdit>);

impl ChangeSet {
    /// Creates a change set from edits, keeping their order.
    pub fn new(edits: Vec<LineEdit>) -> Self {
        Self(edits)
    }

    /// Returns the edits in submission order.
    pub fn edits(&self) -> &[LineEdit] {
        &self.0
    }

    /// Returns the number of edits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no edits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the edits.
    pub fn iter(&self) -> std::slice::Iter<'_, LineEdit> {
        self.0.iter()
    }

    /// Returns the edit targeting `line`, if any.
    pub fn get(&self, line: u32) -> Option<&LineEdit> {
        self.0.iter().rev().find(|edit| edit.line == line)
    }

    /// Indexes the edits by line number. Later edits win on duplicates.
    pub fn by_line(&self) -> BTreeMap<u32, &LineEdit> {
        self.0.iter().map(|edit| (edit.line, edit)).collect()
    }

    /// Returns the edited line numbers in ascending order.
    pub fn lines(&self) -> Vec<u32> {
        self.by_line().into_keys().collect()
    }

    /// Checks that the change set can be accepted.
    ///
    /// Rejects empty sets, line 0, a line edited twice, and sets larger
    /// than `max_edits`.
    pub fn validate(&self, max_edits: usize) -> ProtocolResult<()> {
        if self.0.is_empty() {
            return Err(ProtocolError::EmptyChangeSet);
        }
        if self.0.len() > max_edits {
            return Err(ProtocolError::TooManyEdits {
                count: self.0.len(),
                max: max_edits,
            });
        }

        let mut seen = HashSet::with_capacity(self.0.len());
        for edit in &self.0 {
            if edit.line == 0 {
                return Err(ProtocolError::InvalidLine { line: edit.line });
            }
            if !seen.insert(edit.line) {
                return Err(ProtocolError::DuplicateLine { line: edit.line });
            }
        }
        Ok(())
    }

    /// Combines this change set with `incoming`, ordered by line.
    ///
    /// Lines only one side touches pass through unchanged. Where both
    /// sides touch a line, the incoming edit replaces ours, so callers
    /// must run conflict detection first.
    pub fn union(&self, incoming: &ChangeSet) -> ChangeSet {
        let mut merged: BTreeMap<u32, LineEdit> = self
            .0
            .iter()
            .map(|edit| (edit.line, edit.clone()))
            .collect();
        for edit in &incoming.0 {
            merged.insert(edit.line, edit.clone());
        }
        ChangeSet(merged.into_values().collect())
    }

    /// Returns true if every edit of `other` is already present here verbatim.
    pub fn contains_all(&self, other: &ChangeSet) -> bool {
        let index = self.by_line();
        other
            .iter()
            .all(|edit| index.get(&edit.line).is_some_and(|ours| *ours == edit))
    }
}

impl From<Vec<LineEdit>> for ChangeSet {
    fn from(edits: Vec<LineEdit>) -> Self {
        Self(edits)
    }
}

impl FromIterator<LineEdit> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = LineEdit>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ChangeSet {
    type Item = LineEdit;
    type IntoIter = std::vec::IntoIter<LineEdit>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a LineEdit;
    type IntoIter = std::slice::Iter<'a, LineEdit>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_malformed_sets() {
        assert_eq!(
            ChangeSet::default().validate(10),
            Err(ProtocolError::EmptyChangeSet)
        );
        assert_eq!(
            ChangeSet::new(vec![LineEdit::update(0, "x")]).validate(10),
            Err(ProtocolError::InvalidLine { line: 0 })
        );
        assert_eq!(
            ChangeSet::new(vec![LineEdit::update(2, "x"), LineEdit::update(2, "y")]).validate(10),
            Err(ProtocolError::DuplicateLine { line: 2 })
        );
        let big: ChangeSet = (1..=5).map(|line| LineEdit::insert(line, "z")).collect();
        assert_eq!(
            big.validate(4),
            Err(ProtocolError::TooManyEdits { count: 5, max: 4 })
        );
        assert!(big.validate(5).is_ok());
    }

    #[test]
    fn union_keeps_both_sides_ordered_by_line() {
        let ours = ChangeSet::new(vec![LineEdit::update(3, "c"), LineEdit::update(1, "a")]);
        let theirs = ChangeSet::new(vec![LineEdit::insert(2, "b")]);

        let merged = ours.union(&theirs);
        let lines: Vec<_> = merged.iter().map(|e| (e.line, e.content.as_str())).collect();
        assert_eq!(lines, vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn union_prefers_incoming_on_shared_lines() {
        let ours = ChangeSet::new(vec![LineEdit::insert(1, "same")]);
        let theirs = ChangeSet::new(vec![LineEdit::update(1, "same")]);
        let merged = ours.union(&theirs);
        assert_eq!(merged.edits(), &[LineEdit::update(1, "same")]);
    }

    #[test]
    fn contains_all_requires_exact_edits() {
        let base = ChangeSet::new(vec![LineEdit::update(1, "a"), LineEdit::update(2, "b")]);
        assert!(base.contains_all(&ChangeSet::new(vec![LineEdit::update(2, "b")])));
        assert!(!base.contains_all(&ChangeSet::new(vec![LineEdit::update(2, "B")])));
        assert!(!base.contains_all(&ChangeSet::new(vec![LineEdit::update(3, "c")])));
    }

    #[test]
    fn serializes_with_lowercase_ops() {
        let set = ChangeSet::new(vec![LineEdit::delete(4)]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"[{"line":4,"content":"","op":"delete"}]"#);
    }
}
