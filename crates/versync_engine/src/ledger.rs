//! Permission-checked access to the version chain.

use crate::client::StoreClient;
use crate::collab::{Action, Authorizer};
use crate::error::{SyncError, SyncResult};
use crate::stats::SyncCounters;
use std::sync::Arc;
use tracing::{info, warn};
use versync_protocol::{FileId, FileVersion, Metadata, UserId, VersionDiff, VersionId};

/// Metadata key recording which version a rollback restored.
pub const ROLLBACK_OF: &str = "rollback_of";

/// The version chain as seen by the engine.
///
/// Every mutation asks the authorizer first. Reads are unchecked; callers
/// that expose them to users apply their own read policy.
#[derive(Clone)]
pub(crate) struct VersionLedger {
    client: StoreClient,
    authorizer: Arc<dyn Authorizer>,
    max_stale_reruns: u32,
    counters: Arc<SyncCounters>,
}

impl VersionLedger {
    pub(crate) fn new(
        client: StoreClient,
        authorizer: Arc<dyn Authorizer>,
        max_stale_reruns: u32,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            client,
            authorizer,
            max_stale_reruns,
            counters,
        }
    }

    pub(crate) fn authorize(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        action: Action,
    ) -> SyncResult<()> {
        if self.authorizer.check_permission(user_id, file_id, action) {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied {
                user_id: user_id.clone(),
                file_id: file_id.clone(),
                action,
            })
        }
    }

    /// Appends `version` on top of `expected_previous`.
    pub(crate) async fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> SyncResult<FileVersion> {
        self.authorize(&version.author_id, &version.file_id, Action::Write)?;
        self.client
            .append(version.clone(), expected_previous)
            .await?;
        Ok(version)
    }

    pub(crate) async fn latest(&self, file_id: &FileId) -> SyncResult<Option<FileVersion>> {
        self.client.latest(file_id).await
    }

    pub(crate) async fn history(&self, file_id: &FileId) -> SyncResult<Vec<FileVersion>> {
        self.client.history(file_id).await
    }

    pub(crate) async fn version(
        &self,
        file_id: &FileId,
        version_id: VersionId,
    ) -> SyncResult<FileVersion> {
        self.client
            .version(file_id, version_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("version {version_id} of {file_id}")))
    }

    pub(crate) async fn compare(
        &self,
        file_id: &FileId,
        from: VersionId,
        to: VersionId,
    ) -> SyncResult<VersionDiff> {
        let older = self.version(file_id, from).await?;
        let newer = self.version(file_id, to).await?;
        Ok(VersionDiff::between(&older, &newer))
    }

    /// Appends a new version restoring the edits of `version_id`.
    ///
    /// Intervening versions stay in the chain.
    pub(crate) async fn rollback(
        &self,
        file_id: &FileId,
        user_id: &UserId,
        version_id: VersionId,
    ) -> SyncResult<FileVersion> {
        self.authorize(user_id, file_id, Action::Write)?;

        let mut reruns = 0;
        loop {
            let latest = self
                .latest(file_id)
                .await?
                .ok_or_else(|| SyncError::not_found(format!("no versions of {file_id}")))?;
            let target = self.version(file_id, version_id).await?;

            let mut metadata = Metadata::new();
            metadata.insert(ROLLBACK_OF.to_string(), version_id.to_string());
            let restored = FileVersion::new(
                file_id.clone(),
                user_id.clone(),
                target.change_set,
                metadata,
            );

            match self.append(restored, Some(latest.version_id)).await {
                Ok(version) => {
                    info!(
                        file_id = %file_id,
                        restored = %version_id,
                        version_id = %version.version_id,
                        "rolled back"
                    );
                    return Ok(version);
                }
                Err(SyncError::StaleVersion { .. }) if reruns < self.max_stale_reruns => {
                    reruns += 1;
                    SyncCounters::bump(&self.counters.stale_reruns);
                    warn!(file_id = %file_id, reruns, "rollback lost append race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
