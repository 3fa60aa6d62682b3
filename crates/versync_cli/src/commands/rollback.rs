//! Rollback command implementation.

use super::{open_store, parse_version, print_json, CommandResult};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use versync_engine::SyncService;
use versync_protocol::{FileId, UserId};

/// Runs the rollback command through the sync service, so the new version
/// goes through the same append path as regular syncs.
pub fn run(path: &Path, file: &str, version: &str, user: &str, format: &str) -> CommandResult {
    let file_id = FileId::new(file);
    let user_id = UserId::new(user);
    let version_id = parse_version(version)?;
    let store = open_store(path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let restored = runtime.block_on(async {
        let service = SyncService::new(Arc::new(store));
        let result = service.rollback(&file_id, &user_id, version_id).await;
        service.shutdown().await;
        result
    })?;
    info!(file_id = %file_id, version_id = %restored.version_id, "rollback appended");

    match format {
        "json" => print_json(&restored)?,
        _ => println!(
            "Restored {} of {} as version {}",
            version_id, file_id, restored.version_id
        ),
    }

    Ok(())
}
