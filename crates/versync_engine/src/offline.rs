//! Staging area for edits captured while disconnected.
//!
//! One slot per (file, user): saving overwrites the previous capture.
//! Replay enqueues each record as an offline task and deletes it once the
//! queue accepted the task. A crash between acceptance and append may
//! replay the same edit twice; the dispatcher treats the second replay
//! as a duplicate and appends nothing.

use crate::client::StoreClient;
use crate::collab::Action;
use crate::error::{SyncError, SyncResult};
use crate::ledger::VersionLedger;
use crate::queue::SyncQueue;
use tracing::{debug, info, warn};
use versync_protocol::{ChangeSet, FileId, OfflineRecord, Platform, SyncTask, UserId};

#[derive(Clone)]
pub(crate) struct OfflineBuffer {
    client: StoreClient,
    ledger: VersionLedger,
    max_changes: usize,
}

impl OfflineBuffer {
    pub(crate) fn new(client: StoreClient, ledger: VersionLedger, max_changes: usize) -> Self {
        Self {
            client,
            ledger,
            max_changes,
        }
    }

    pub(crate) async fn save(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        change_set: ChangeSet,
        platform: Option<Platform>,
    ) -> SyncResult<OfflineRecord> {
        user_id.validate()?;
        file_id.validate()?;
        change_set.validate(self.max_changes)?;
        self.ledger.authorize(user_id, file_id, Action::Write)?;

        let mut record = OfflineRecord::new(file_id.clone(), user_id.clone(), change_set);
        record.platform = platform;
        if self.client.save_offline(record.clone()).await?.is_some() {
            debug!(user_id = %user_id, file_id = %file_id, "replaced buffered offline edit");
        }
        Ok(record)
    }

    pub(crate) async fn pending(&self, user_id: &UserId) -> SyncResult<Vec<OfflineRecord>> {
        self.client.offline_for(user_id).await
    }

    pub(crate) async fn discard(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> SyncResult<OfflineRecord> {
        self.client
            .remove_offline(user_id, file_id)
            .await?
            .ok_or_else(|| {
                SyncError::not_found(format!("offline edit of {file_id} by {user_id}"))
            })
    }

    /// Enqueues every buffered record of `user_id` as an offline task.
    pub(crate) async fn replay_all(
        &self,
        user_id: &UserId,
        queue: &SyncQueue,
    ) -> SyncResult<Vec<SyncTask>> {
        let records = self.pending(user_id).await?;
        let mut tasks = Vec::with_capacity(records.len());

        for record in records {
            let task = record.to_task();
            queue.enqueue(task.clone()).await?;

            // A newer capture saved meanwhile keeps its slot.
            match self
                .client
                .remove_offline_if(user_id, &record.file_id, record.captured_at)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(
                    user_id = %user_id,
                    file_id = %record.file_id,
                    "offline slot replaced during replay, keeping newer edit"
                ),
                Err(e) => warn!(
                    user_id = %user_id,
                    file_id = %record.file_id,
                    error = %e,
                    "failed to delete replayed offline edit"
                ),
            }
            tasks.push(task);
        }

        if !tasks.is_empty() {
            info!(user_id = %user_id, count = tasks.len(), "replayed offline edits");
        }
        Ok(tasks)
    }
}
