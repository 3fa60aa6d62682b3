//! Property-based test generators using proptest.

use proptest::prelude::*;
use std::ops::Range;
use versync_protocol::{ChangeSet, EditOp, FileId, LineEdit, UserId};

/// Strategy for edit kinds.
pub fn edit_op_strategy() -> impl Strategy<Value = EditOp> {
    prop_oneof![Just(EditOp::Insert), Just(EditOp::Update), Just(EditOp::Delete)]
}

/// Strategy for line contents.
pub fn content_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z ]{0,12}").expect("Invalid regex")
}

/// Strategy for valid change sets editing lines within `lines`.
///
/// Each line is edited at most once, as validation requires.
pub fn change_set_strategy(lines: Range<u32>, max_len: usize) -> impl Strategy<Value = ChangeSet> {
    prop::collection::btree_map(
        lines,
        (content_strategy(), edit_op_strategy()),
        1..=max_len.max(1),
    )
    .prop_map(|edits| {
        edits
            .into_iter()
            .map(|(line, (content, op))| LineEdit::new(line, content, op))
            .collect()
    })
}

/// Strategy for two change sets editing disjoint lines.
pub fn disjoint_change_sets() -> impl Strategy<Value = (ChangeSet, ChangeSet)> {
    (1u32..200).prop_flat_map(|split| {
        (
            change_set_strategy(1..split + 1, 16),
            change_set_strategy(split + 1..split + 201, 16),
        )
    })
}

/// Strategy for file ids.
pub fn file_id_strategy() -> impl Strategy<Value = FileId> {
    prop::string::string_regex("[a-z]{1,8}\\.(txt|md|rs)")
        .expect("Invalid regex")
        .prop_map(FileId::from)
}

/// Strategy for user ids.
pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    prop::string::string_regex("[a-z]{3,10}")
        .expect("Invalid regex")
        .prop_map(UserId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_protocol::detect;

    proptest! {
        #[test]
        fn generated_change_sets_validate(set in change_set_strategy(1..50, 10)) {
            prop_assert!(set.validate(10).is_ok());
        }

        #[test]
        fn disjoint_sets_share_no_line((a, b) in disjoint_change_sets()) {
            for line in a.lines() {
                prop_assert!(b.get(line).is_none());
            }
            prop_assert!(!detect(&a, &b));
        }
    }
}
