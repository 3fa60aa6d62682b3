//! Diff command implementation.

use super::{open_store, parse_version, print_json, CommandResult};
use std::path::Path;
use versync_protocol::{FileId, VersionDiff};
use versync_store::VersionStore;

/// Runs the diff command.
pub fn run(path: &Path, file: &str, from: &str, to: &str, format: &str) -> CommandResult {
    let file_id = FileId::new(file);
    let from = parse_version(from)?;
    let to = parse_version(to)?;
    let store = open_store(path)?;

    let older = store
        .version(&file_id, from)?
        .ok_or_else(|| format!("Version {from} of {file_id} not found"))?;
    let newer = store
        .version(&file_id, to)?
        .ok_or_else(|| format!("Version {to} of {file_id} not found"))?;
    let diff = VersionDiff::between(&older, &newer);

    match format {
        "json" => print_json(&diff)?,
        _ => print_text_output(&diff),
    }

    Ok(())
}

fn print_text_output(diff: &VersionDiff) {
    println!("--- {}", diff.from);
    println!("+++ {}", diff.to);
    if diff.is_empty() {
        println!("(no differences)");
        return;
    }
    for edit in &diff.removed {
        println!("- {:>6}  {}", edit.line, edit.content);
    }
    for edit in &diff.added {
        println!("+ {:>6}  {}", edit.line, edit.content);
    }
    for change in &diff.changed {
        println!(
            "~ {:>6}  {} -> {}",
            change.line, change.before.content, change.after.content
        );
    }
}
