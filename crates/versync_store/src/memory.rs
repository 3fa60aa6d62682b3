//! In-memory store for tests and ephemeral engines.

use crate::backend::{OfflineStore, StatusStore, VersionStore};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};

/// Row tables shared by every backend.
///
/// Backends hold this behind a lock; `DirStore` additionally persists
/// each mutation before it becomes visible.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    /// Version chains, oldest first.
    pub(crate) versions: HashMap<FileId, Vec<FileVersion>>,
    pub(crate) statuses: BTreeMap<FileId, SyncStatus>,
    pub(crate) offline: BTreeMap<(UserId, FileId), OfflineRecord>,
}

impl Tables {
    pub(crate) fn check_append(
        &self,
        version: &FileVersion,
        expected_previous: Option<VersionId>,
    ) -> StoreResult<()> {
        let actual = self.latest_id(&version.file_id);
        if actual != expected_previous {
            return Err(StoreError::Stale {
                file_id: version.file_id.clone(),
                expected: expected_previous,
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn push_version(&mut self, version: FileVersion) {
        self.versions
            .entry(version.file_id.clone())
            .or_default()
            .push(version);
    }

    fn latest_id(&self, file_id: &FileId) -> Option<VersionId> {
        self.versions
            .get(file_id)
            .and_then(|chain| chain.last())
            .map(|v| v.version_id)
    }

    pub(crate) fn latest(&self, file_id: &FileId) -> Option<FileVersion> {
        self.versions.get(file_id).and_then(|chain| chain.last()).cloned()
    }

    pub(crate) fn history(&self, file_id: &FileId) -> Vec<FileVersion> {
        self.versions
            .get(file_id)
            .map(|chain| chain.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn version(&self, file_id: &FileId, version_id: VersionId) -> Option<FileVersion> {
        self.versions
            .get(file_id)
            .and_then(|chain| chain.iter().find(|v| v.version_id == version_id))
            .cloned()
    }

    pub(crate) fn files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = self
            .versions
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        files.sort();
        files
    }

    pub(crate) fn offline_for(&self, user_id: &UserId) -> Vec<OfflineRecord> {
        self.offline
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub(crate) fn offline_captured_at(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> Option<DateTime<Utc>> {
        self.offline
            .get(&(user_id.clone(), file_id.clone()))
            .map(|record| record.captured_at)
    }
}

/// An in-memory store.
///
/// Thread-safe; share it behind an `Arc`. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored versions across all files.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.tables.read().versions.values().map(Vec::len).sum()
    }
}

impl VersionStore for MemoryStore {
    fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.check_append(&version, expected_previous)?;
        tables.push_version(version);
        Ok(())
    }

    fn latest(&self, file_id: &FileId) -> StoreResult<Option<FileVersion>> {
        Ok(self.tables.read().latest(file_id))
    }

    fn history(&self, file_id: &FileId) -> StoreResult<Vec<FileVersion>> {
        Ok(self.tables.read().history(file_id))
    }

    fn version(
        &self,
        file_id: &FileId,
        version_id: VersionId,
    ) -> StoreResult<Option<FileVersion>> {
        Ok(self.tables.read().version(file_id, version_id))
    }

    fn files(&self) -> StoreResult<Vec<FileId>> {
        Ok(self.tables.read().files())
    }
}

impl StatusStore for MemoryStore {
    fn get_status(&self, file_id: &FileId) -> StoreResult<Option<SyncStatus>> {
        Ok(self.tables.read().statuses.get(file_id).cloned())
    }

    fn put_status(&self, status: SyncStatus) -> StoreResult<()> {
        self.tables
            .write()
            .statuses
            .insert(status.file_id.clone(), status);
        Ok(())
    }

    fn all_statuses(&self) -> StoreResult<Vec<SyncStatus>> {
        Ok(self.tables.read().statuses.values().cloned().collect())
    }
}

impl OfflineStore for MemoryStore {
    fn save_offline(&self, record: OfflineRecord) -> StoreResult<Option<OfflineRecord>> {
        let key = (record.user_id.clone(), record.file_id.clone());
        Ok(self.tables.write().offline.insert(key, record))
    }

    fn offline_for(&self, user_id: &UserId) -> StoreResult<Vec<OfflineRecord>> {
        Ok(self.tables.read().offline_for(user_id))
    }

    fn remove_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> StoreResult<Option<OfflineRecord>> {
        Ok(self
            .tables
            .write()
            .offline
            .remove(&(user_id.clone(), file_id.clone())))
    }

    fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        if tables.offline_captured_at(user_id, file_id) != Some(captured_at) {
            return Ok(false);
        }
        tables.offline.remove(&(user_id.clone(), file_id.clone()));
        Ok(true)
    }
}
