//! Offline buffer command implementation.

use super::{format_time, open_store, print_edits, print_json, CommandResult};
use std::path::Path;
use versync_protocol::{FileId, UserId};
use versync_store::OfflineStore;

/// Runs the offline command.
///
/// Lists the user's buffered edits, or discards the one for `discard`.
pub fn run(path: &Path, user: &str, discard: Option<&str>, format: &str) -> CommandResult {
    let user_id = UserId::new(user);
    user_id.validate()?;
    let store = open_store(path)?;

    if let Some(file) = discard {
        let file_id = FileId::new(file);
        let removed = store
            .remove_offline(&user_id, &file_id)?
            .ok_or_else(|| format!("No offline edit of {file_id} buffered for {user_id}"))?;
        match format {
            "json" => print_json(&removed)?,
            _ => println!(
                "Discarded {} edits of {} for {}",
                removed.change_set.len(),
                file_id,
                user_id
            ),
        }
        return Ok(());
    }

    let records = store.offline_for(&user_id)?;
    match format {
        "json" => print_json(&records)?,
        _ => {
            println!("Offline edits of {} ({})", user_id, records.len());
            for record in &records {
                println!();
                let platform = record
                    .platform
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  captured {}  platform {}",
                    record.file_id,
                    format_time(&record.captured_at),
                    platform
                );
                print_edits(&record.change_set);
            }
        }
    }

    Ok(())
}
