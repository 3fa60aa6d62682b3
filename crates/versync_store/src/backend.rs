//! Storage traits.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};

/// The per-file version chain.
///
/// # Invariants
///
/// - Versions of one file form an append-only chain; nothing is ever
///   rewritten or removed
/// - `append` is an atomic compare-and-append: it succeeds only if the
///   file's latest version id equals `expected_previous`
/// - `history` returns the chain newest first
pub trait VersionStore: Send + Sync {
    /// Appends `version` if the file's latest version is `expected_previous`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Stale` if another append won the race.
    fn append(&self, version: FileVersion, expected_previous: Option<VersionId>)
        -> StoreResult<()>;

    /// Returns the latest version of a file.
    fn latest(&self, file_id: &FileId) -> StoreResult<Option<FileVersion>>;

    /// Returns every version of a file, newest first.
    fn history(&self, file_id: &FileId) -> StoreResult<Vec<FileVersion>>;

    /// Returns one version of a file.
    fn version(&self, file_id: &FileId, version_id: VersionId)
        -> StoreResult<Option<FileVersion>>;

    /// Returns every file with at least one version, sorted.
    fn files(&self) -> StoreResult<Vec<FileId>>;
}

/// The sync-status table, one row per file.
pub trait StatusStore: Send + Sync {
    /// Returns the status row of a file, if one was ever written.
    fn get_status(&self, file_id: &FileId) -> StoreResult<Option<SyncStatus>>;

    /// Inserts or replaces a status row.
    fn put_status(&self, status: SyncStatus) -> StoreResult<()>;

    /// Returns every status row, sorted by file.
    fn all_statuses(&self) -> StoreResult<Vec<SyncStatus>>;
}

/// The offline buffer, one slot per (file, user).
pub trait OfflineStore: Send + Sync {
    /// Stores `record`, returning the record it replaced.
    fn save_offline(&self, record: OfflineRecord) -> StoreResult<Option<OfflineRecord>>;

    /// Returns the records of a user, sorted by file.
    fn offline_for(&self, user_id: &UserId) -> StoreResult<Vec<OfflineRecord>>;

    /// Removes the record of (file, user), returning it.
    fn remove_offline(&self, user_id: &UserId, file_id: &FileId)
        -> StoreResult<Option<OfflineRecord>>;

    /// Removes the record of (file, user) only if it was captured at `captured_at`.
    ///
    /// Returns false if the slot is empty or holds a newer capture.
    fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// A backend serving all three tables.
pub trait Store: VersionStore + StatusStore + OfflineStore {}

impl<T: VersionStore + StatusStore + OfflineStore + ?Sized> Store for T {}
