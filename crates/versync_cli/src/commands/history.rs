//! History command implementation.

use super::{format_time, open_store, print_json, CommandResult};
use std::path::Path;
use versync_engine::ROLLBACK_OF;
use versync_protocol::FileId;
use versync_store::VersionStore;

/// Runs the history command.
pub fn run(path: &Path, file: &str, limit: Option<usize>, format: &str) -> CommandResult {
    let file_id = FileId::new(file);
    file_id.validate()?;
    let store = open_store(path)?;

    let mut history = store.history(&file_id)?;
    let total = history.len();
    if let Some(limit) = limit {
        history.truncate(limit);
    }

    match format {
        "json" => print_json(&history)?,
        _ => {
            println!("History of {} ({} versions)", file_id, total);
            println!();
            for version in &history {
                let note = version
                    .metadata
                    .get(ROLLBACK_OF)
                    .map(|from| format!("  (rollback of {from})"))
                    .unwrap_or_default();
                println!(
                    "{}  {}  {:<12}  {} edits{}",
                    version.version_id,
                    format_time(&version.created_at),
                    version.author_id.as_str(),
                    version.change_set.len(),
                    note
                );
            }
        }
    }

    Ok(())
}
