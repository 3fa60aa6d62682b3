//! Status command implementation.

use super::{format_time, open_store, print_json, CommandResult};
use std::path::Path;
use versync_protocol::{FileId, SyncStatus};
use versync_store::StatusStore;

/// Runs the status command.
pub fn run(path: &Path, file: Option<&str>, format: &str) -> CommandResult {
    let store = open_store(path)?;

    let statuses = match file {
        Some(file) => {
            let file_id = FileId::new(file);
            let status = store
                .get_status(&file_id)?
                .unwrap_or_else(|| SyncStatus::idle(file_id));
            vec![status]
        }
        None => store.all_statuses()?,
    };

    match format {
        "json" => print_json(&statuses)?,
        _ => {
            if statuses.is_empty() {
                println!("No files have been synced");
            }
            for status in &statuses {
                let last = status
                    .last_synced_at
                    .as_ref()
                    .map(format_time)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<32}  {:<8}  {}",
                    status.file_id.as_str(),
                    status.status.as_str(),
                    last
                );
            }
        }
    }

    Ok(())
}
