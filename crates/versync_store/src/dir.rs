//! Directory-backed store.
//!
//! Layout of a store directory:
//!
//! ```text
//! <path>/
//! ├─ LOCK                 # Advisory lock for single-process ownership
//! ├─ versions.jsonl       # Append-only version log, one JSON row per line
//! ├─ sync_status.json     # Status table snapshot
//! └─ offline_buffer.json  # Offline buffer snapshot
//! ```
//!
//! The version log is only ever appended to. A trailing line without its
//! newline is a torn write from a crash and is truncated on open. A write
//! that fails while the store is open is cut back before the error is
//! returned, so a retried append never lands behind a partial row. The two
//! snapshot tables are small and rewritten whole with write-then-rename.

use crate::backend::{OfflineStore, StatusStore, VersionStore};
use crate::error::{StoreError, StoreResult};
use crate::memory::Tables;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};

const LOCK_FILE: &str = "LOCK";
const VERSIONS_FILE: &str = "versions.jsonl";
const STATUS_FILE: &str = "sync_status.json";
const OFFLINE_FILE: &str = "offline_buffer.json";

/// A store persisted in a local directory.
///
/// # Thread Safety
///
/// The `DirStore` holds an exclusive lock on its directory; only one
/// instance may exist per directory at a time. Within the process it is
/// `Send + Sync` and mutations are serialized.
///
/// # Example
///
/// ```rust,ignore
/// use versync_store::DirStore;
/// use std::path::Path;
///
/// let store = DirStore::open(Path::new("sync_data"), true)?;
/// ```
#[derive(Debug)]
pub struct DirStore {
    path: PathBuf,
    tables: RwLock<Tables>,
    log: Mutex<VersionLog>,
    _lock_file: File,
}

/// Append handle on the version log.
///
/// `len` is the end of the last complete row. Bytes past it come from a
/// failed write and are cut off before the next row is written.
#[derive(Debug)]
struct VersionLog {
    file: File,
    len: u64,
    poisoned: bool,
}

impl VersionLog {
    fn open(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            poisoned: false,
        })
    }

    /// Writes one encoded row, newline included, and syncs it.
    ///
    /// On failure the log is cut back to its previous length. If even that
    /// fails the log refuses every later append until the store is reopened.
    fn append(&mut self, row: &[u8]) -> StoreResult<()> {
        if self.poisoned {
            return Err(StoreError::corrupted(format!(
                "{VERSIONS_FILE} could not be cut back after a failed append; reopen the store"
            )));
        }

        let actual = self.file.metadata()?.len();
        if actual != self.len {
            warn!(
                expected = self.len,
                actual, "discarding partial row at end of version log"
            );
            self.cut_back()?;
        }

        let written = self
            .file
            .write_all(row)
            .and_then(|()| self.file.sync_data());
        match written {
            Ok(()) => {
                self.len += row.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!(len = self.len, error = %e, "version log append failed");
                // A failed cut-back poisons the log; the caller sees the write error.
                let _ = self.cut_back();
                Err(e.into())
            }
        }
    }

    fn cut_back(&mut self) -> StoreResult<()> {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = restored {
            self.poisoned = true;
            error!(
                len = self.len,
                error = %e,
                "failed to cut back version log, refusing further appends"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

impl DirStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - A persisted row cannot be decoded (returns `Corrupted`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::NotFound(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(StoreError::corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        let mut tables = Tables::default();
        for version in load_versions(&path.join(VERSIONS_FILE))? {
            tables.push_version(version);
        }
        for status in load_snapshot::<SyncStatus>(&path.join(STATUS_FILE))? {
            tables.statuses.insert(status.file_id.clone(), status);
        }
        for record in load_snapshot::<OfflineRecord>(&path.join(OFFLINE_FILE))? {
            tables
                .offline
                .insert((record.user_id.clone(), record.file_id.clone()), record);
        }

        let log = VersionLog::open(&path.join(VERSIONS_FILE))?;

        debug!(
            path = %path.display(),
            files = tables.versions.len(),
            statuses = tables.statuses.len(),
            offline = tables.offline.len(),
            "opened store directory"
        );

        Ok(Self {
            path: path.to_path_buf(),
            tables: RwLock::new(tables),
            log: Mutex::new(log),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites a snapshot file with write-then-rename.
    fn write_snapshot<T: Serialize>(&self, name: &str, rows: &[T]) -> StoreResult<()> {
        let target = self.path.join(name);
        let temp = self.path.join(format!("{name}.tmp"));

        let data = serde_json::to_vec_pretty(rows)?;
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_directory()
    }

    fn persist_statuses(&self, tables: &Tables) -> StoreResult<()> {
        let rows: Vec<&SyncStatus> = tables.statuses.values().collect();
        self.write_snapshot(STATUS_FILE, &rows)
    }

    fn persist_offline(&self, tables: &Tables) -> StoreResult<()> {
        let rows: Vec<&OfflineRecord> = tables.offline.values().collect();
        self.write_snapshot(OFFLINE_FILE, &rows)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Reads the version log, truncating a torn final line.
fn load_versions(path: &Path) -> StoreResult<Vec<FileVersion>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;

    let mut versions = Vec::new();
    let mut offset = 0usize;
    for (index, segment) in content.split_inclusive('\n').enumerate() {
        if !segment.ends_with('\n') {
            warn!(
                path = %path.display(),
                offset,
                "truncating torn tail of version log"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset as u64)?;
            file.sync_all()?;
            break;
        }
        offset += segment.len();

        let line = segment.trim();
        if line.is_empty() {
            continue;
        }
        let version: FileVersion = serde_json::from_str(line).map_err(|e| {
            StoreError::corrupted(format!("{VERSIONS_FILE} line {}: {e}", index + 1))
        })?;
        versions.push(version);
    }
    Ok(versions)
}

fn load_snapshot<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(path)?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&data)
        .map_err(|e| StoreError::corrupted(format!("{}: {e}", path.display())))
}

impl VersionStore for DirStore {
    fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.check_append(&version, expected_previous)?;

        let mut row = serde_json::to_vec(&version)?;
        row.push(b'\n');
        self.log.lock().append(&row)?;

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

impl StatusStore for DirStore {
    fn get_status(&self, file_id: &FileId) -> StoreResult<Option<SyncStatus>> {
        Ok(self.tables.read().statuses.get(file_id).cloned())
    }

    fn put_status(&self, status: SyncStatus) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let previous = tables.statuses.insert(status.file_id.clone(), status.clone());
        if let Err(e) = self.persist_statuses(&tables) {
            match previous {
                Some(row) => tables.statuses.insert(row.file_id.clone(), row),
                None => tables.statuses.remove(&status.file_id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn all_statuses(&self) -> StoreResult<Vec<SyncStatus>> {
        Ok(self.tables.read().statuses.values().cloned().collect())
    }
}

impl OfflineStore for DirStore {
    fn save_offline(&self, record: OfflineRecord) -> StoreResult<Option<OfflineRecord>> {
        let key = (record.user_id.clone(), record.file_id.clone());
        let mut tables = self.tables.write();
        let previous = tables.offline.insert(key.clone(), record);
        if let Err(e) = self.persist_offline(&tables) {
            match previous {
                Some(row) => tables.offline.insert(key, row),
                None => tables.offline.remove(&key),
            };
            return Err(e);
        }
        Ok(previous)
    }

    fn offline_for(&self, user_id: &UserId) -> StoreResult<Vec<OfflineRecord>> {
        Ok(self.tables.read().offline_for(user_id))
    }

    fn remove_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> StoreResult<Option<OfflineRecord>> {
        let key = (user_id.clone(), file_id.clone());
        let mut tables = self.tables.write();
        let Some(removed) = tables.offline.remove(&key) else {
            return Ok(None);
        };
        if let Err(e) = self.persist_offline(&tables) {
            tables.offline.insert(key, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let key = (user_id.clone(), file_id.clone());
        let mut tables = self.tables.write();
        if tables.offline_captured_at(user_id, file_id) != Some(captured_at) {
            return Ok(false);
        }
        let Some(removed) = tables.offline.remove(&key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist_offline(&tables) {
            tables.offline.insert(key, removed);
            return Err(e);
        }
        Ok(true)
    }
}
