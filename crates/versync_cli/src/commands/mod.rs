//! CLI command implementations.

pub mod diff;
pub mod history;
pub mod offline;
pub mod rollback;
pub mod show;
pub mod status;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use versync_protocol::{ChangeSet, VersionId};
use versync_store::DirStore;

/// Result type shared by the commands.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Opens an existing data directory.
pub fn open_store(path: &Path) -> Result<DirStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data directory found at {:?}", path).into());
    }
    Ok(DirStore::open(path, false)?)
}

/// Parses a version id argument.
pub fn parse_version(raw: &str) -> Result<VersionId, Box<dyn std::error::Error>> {
    raw.parse::<VersionId>()
        .map_err(|e| format!("Invalid version id {raw:?}: {e}").into())
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats a timestamp for text output.
pub fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Prints the edits of a change set, one per line.
pub fn print_edits(change_set: &ChangeSet) {
    for edit in change_set.iter() {
        println!("  {:>6}  {:<6}  {}", edit.line, edit.op.as_str(), edit.content);
    }
}
