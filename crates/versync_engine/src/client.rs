//! Timed access to the store from async code.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};
use versync_store::{OfflineStore, StatusStore, Store, StoreError, VersionStore};

/// Runs `f` on the blocking pool, giving up after `limit`.
///
/// A timed-out call keeps running in the background; its result is dropped.
pub(crate) async fn run_blocking<T, F>(limit: Duration, op: &'static str, f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(SyncError::Store(format!("{op} panicked: {join}"))),
        Err(_) => Err(StoreError::Timeout(limit).into()),
    }
}

/// Store handle whose every call carries the configured timeout.
#[derive(Clone)]
pub(crate) struct StoreClient {
    store: Arc<dyn Store>,
    limit: Duration,
}

impl StoreClient {
    pub(crate) fn new(store: Arc<dyn Store>, limit: Duration) -> Self {
        Self { store, limit }
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> SyncResult<T>
    where
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        run_blocking(self.limit, op, move || f(store.as_ref()).map_err(SyncError::from)).await
    }

    pub(crate) async fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> SyncResult<()> {
        self.call("append", move |s| s.append(version, expected_previous))
            .await
    }

    pub(crate) async fn latest(&self, file_id: &FileId) -> SyncResult<Option<FileVersion>> {
        let file_id = file_id.clone();
        self.call("latest", move |s| s.latest(&file_id)).await
    }

    pub(crate) async fn history(&self, file_id: &FileId) -> SyncResult<Vec<FileVersion>> {
        let file_id = file_id.clone();
        self.call("history", move |s| s.history(&file_id)).await
    }

    pub(crate) async fn version(
        &self,
        file_id: &FileId,
        version_id: VersionId,
    ) -> SyncResult<Option<FileVersion>> {
        let file_id = file_id.clone();
        self.call("version", move |s| s.version(&file_id, version_id))
            .await
    }

    pub(crate) async fn get_status(&self, file_id: &FileId) -> SyncResult<Option<SyncStatus>> {
        let file_id = file_id.clone();
        self.call("get_status", move |s| s.get_status(&file_id)).await
    }

    pub(crate) async fn put_status(&self, status: SyncStatus) -> SyncResult<()> {
        self.call("put_status", move |s| s.put_status(status)).await
    }

    pub(crate) async fn all_statuses(&self) -> SyncResult<Vec<SyncStatus>> {
        self.call("all_statuses", |s| s.all_statuses()).await
    }

    pub(crate) async fn save_offline(
        &self,
        record: OfflineRecord,
    ) -> SyncResult<Option<OfflineRecord>> {
        self.call("save_offline", move |s| s.save_offline(record))
            .await
    }

    pub(crate) async fn offline_for(&self, user_id: &UserId) -> SyncResult<Vec<OfflineRecord>> {
        let user_id = user_id.clone();
        self.call("offline_for", move |s| s.offline_for(&user_id))
            .await
    }

    pub(crate) async fn remove_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> SyncResult<Option<OfflineRecord>> {
        let (user_id, file_id) = (user_id.clone(), file_id.clone());
        self.call("remove_offline", move |s| {
            s.remove_offline(&user_id, &file_id)
        })
        .await
    }

    pub(crate) async fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> SyncResult<bool> {
        let (user_id, file_id) = (user_id.clone(), file_id.clone());
        self.call("remove_offline_if", move |s| {
            s.remove_offline_if(&user_id, &file_id, captured_at)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_store::MemoryStore;

    #[tokio::test]
    async fn slow_calls_time_out_as_retryable() {
        let result: SyncResult<()> = run_blocking(Duration::from_millis(10), "sleep", || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::StoreTimeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_round_trips_status_rows() {
        let client = StoreClient::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let file = FileId::new("f");
        assert_eq!(client.get_status(&file).await.unwrap(), None);

        client.put_status(SyncStatus::idle(file.clone())).await.unwrap();
        assert_eq!(
            client.get_status(&file).await.unwrap(),
            Some(SyncStatus::idle(file))
        );
        assert_eq!(client.all_statuses().await.unwrap().len(), 1);
    }
}
