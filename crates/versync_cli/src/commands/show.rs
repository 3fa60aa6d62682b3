//! Show command implementation.

use super::{format_time, open_store, parse_version, print_edits, print_json, CommandResult};
use std::path::Path;
use versync_protocol::FileId;
use versync_store::VersionStore;

/// Runs the show command.
pub fn run(path: &Path, file: &str, version: &str, format: &str) -> CommandResult {
    let file_id = FileId::new(file);
    let version_id = parse_version(version)?;
    let store = open_store(path)?;

    let version = store
        .version(&file_id, version_id)?
        .ok_or_else(|| format!("Version {version_id} of {file_id} not found"))?;

    match format {
        "json" => print_json(&version)?,
        _ => {
            println!("Version {}", version.version_id);
            println!("  File:    {}", version.file_id);
            println!("  Author:  {}", version.author_id);
            println!("  Created: {}", format_time(&version.created_at));
            if !version.metadata.is_empty() {
                println!("  Metadata:");
                for (key, value) in &version.metadata {
                    println!("    {key} = {value}");
                }
            }
            println!();
            println!("Edits:");
            print_edits(&version.change_set);
        }
    }

    Ok(())
}
