//! Append races on demand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};
use versync_store::{MemoryStore, OfflineStore, StatusStore, StoreResult, VersionStore};

/// Store wrapper that lets another writer win the next append race of a file.
///
/// When an append for an armed file arrives, the rival version is appended
/// first on top of the current latest, so the caller's compare-and-append
/// finds its expected previous version stale. Each rival fires once.
///
/// ```rust,ignore
/// let store = Arc::new(RivalStore::new(MemoryStore::new()));
/// store.arm(rival_version);
/// ```
#[derive(Debug, Default)]
pub struct RivalStore<S = MemoryStore> {
    inner: S,
    rivals: Mutex<HashMap<FileId, FileVersion>>,
}

impl<S> RivalStore<S> {
    /// Wraps `inner` with no rival armed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            rivals: Mutex::new(HashMap::new()),
        }
    }

    /// Arms `rival` to be appended just before the next append to its file.
    pub fn arm(&self, rival: FileVersion) {
        self.rivals.lock().insert(rival.file_id.clone(), rival);
    }

    /// Returns true if a rival for `file_id` has not fired yet.
    pub fn is_armed(&self, file_id: &FileId) -> bool {
        self.rivals.lock().contains_key(file_id)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: VersionStore> VersionStore for RivalStore<S> {
    fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> StoreResult<()> {
        let rival = self.rivals.lock().remove(&version.file_id);
        if let Some(rival) = rival {
            let head = self.inner.latest(&rival.file_id)?.map(|v| v.version_id);
            self.inner.append(rival, head)?;
        }
        self.inner.append(version, expected_previous)
    }

    fn latest(&self, file_id: &FileId) -> StoreResult<Option<FileVersion>> {
        self.inner.latest(file_id)
    }

    fn history(&self, file_id: &FileId) -> StoreResult<Vec<FileVersion>> {
        self.inner.history(file_id)
    }

    fn version(
        &self,
        file_id: &FileId,
        version_id: VersionId,
    ) -> StoreResult<Option<FileVersion>> {
        self.inner.version(file_id, version_id)
    }

    fn files(&self) -> StoreResult<Vec<FileId>> {
        self.inner.files()
    }
}

impl<S: StatusStore> StatusStore for RivalStore<S> {
    fn get_status(&self, file_id: &FileId) -> StoreResult<Option<SyncStatus>> {
        self.inner.get_status(file_id)
    }

    fn put_status(&self, status: SyncStatus) -> StoreResult<()> {
        self.inner.put_status(status)
    }

    fn all_statuses(&self) -> StoreResult<Vec<SyncStatus>> {
        self.inner.all_statuses()
    }
}

impl<S: OfflineStore> OfflineStore for RivalStore<S> {
    fn save_offline(&self, record: OfflineRecord) -> StoreResult<Option<OfflineRecord>> {
        self.inner.save_offline(record)
    }

    fn offline_for(&self, user_id: &UserId) -> StoreResult<Vec<OfflineRecord>> {
        self.inner.offline_for(user_id)
    }

    fn remove_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> StoreResult<Option<OfflineRecord>> {
        self.inner.remove_offline(user_id, file_id)
    }

    fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.remove_offline_if(user_id, file_id, captured_at)
    }
}
