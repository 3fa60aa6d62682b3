//! Fault injection for store calls.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use versync_protocol::{FileId, FileVersion, OfflineRecord, SyncStatus, UserId, VersionId};
use versync_store::{
    MemoryStore, OfflineStore, StatusStore, StoreError, StoreResult, VersionStore,
};

/// A store operation a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `VersionStore::append`.
    Append,
    /// `VersionStore::latest`.
    Latest,
    /// `VersionStore::history`.
    History,
    /// `StatusStore::put_status`.
    PutStatus,
    /// `OfflineStore::save_offline`.
    SaveOffline,
    /// `OfflineStore::remove_offline` and `remove_offline_if`.
    RemoveOffline,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail,
    Stall(Duration),
}

/// Store wrapper that fails or stalls the next calls of chosen operations.
///
/// A stalled call sleeps, then fails as unavailable, so a call the engine
/// already gave up on has no side effect.
///
/// ```rust,ignore
/// let store = FlakyStore::new(MemoryStore::new()).fail(StoreOp::Append, 2);
/// ```
#[derive(Debug)]
pub struct FlakyStore<S = MemoryStore> {
    inner: S,
    faults: Mutex<HashMap<StoreOp, (Fault, usize)>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl<S> FlakyStore<S> {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fails the next `times` calls of `op`.
    pub fn fail(self, op: StoreOp, times: usize) -> Self {
        self.faults.lock().insert(op, (Fault::Fail, times));
        self
    }

    /// Stalls the next `times` calls of `op` for `delay` each.
    pub fn stall(self, op: StoreOp, times: usize, delay: Duration) -> Self {
        self.faults.lock().insert(op, (Fault::Stall(delay), times));
        self
    }

    /// Returns how often `op` was called, faulted or not.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let fault = {
            let mut faults = self.faults.lock();
            match faults.get_mut(&op) {
                Some((fault, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*fault)
                }
                _ => None,
            }
        };

        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(StoreError::unavailable(format!("injected {op:?} failure"))),
            Some(Fault::Stall(delay)) => {
                std::thread::sleep(delay);
                Err(StoreError::unavailable(format!("injected {op:?} stall")))
            }
        }
    }
}

impl<S: VersionStore> VersionStore for FlakyStore<S> {
    fn append(
        &self,
        version: FileVersion,
        expected_previous: Option<VersionId>,
    ) -> StoreResult<()> {
        self.check(StoreOp::Append)?;
        self.inner.append(version, expected_previous)
    }

    fn latest(&self, file_id: &FileId) -> StoreResult<Option<FileVersion>> {
        self.check(StoreOp::Latest)?;
        self.inner.latest(file_id)
    }

    fn history(&self, file_id: &FileId) -> StoreResult<Vec<FileVersion>> {
        self.check(StoreOp::History)?;
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

impl<S: StatusStore> StatusStore for FlakyStore<S> {
    fn get_status(&self, file_id: &FileId) -> StoreResult<Option<SyncStatus>> {
        self.inner.get_status(file_id)
    }

    fn put_status(&self, status: SyncStatus) -> StoreResult<()> {
        self.check(StoreOp::PutStatus)?;
        self.inner.put_status(status)
    }

    fn all_statuses(&self) -> StoreResult<Vec<SyncStatus>> {
        self.inner.all_statuses()
    }
}

impl<S: OfflineStore> OfflineStore for FlakyStore<S> {
    fn save_offline(&self, record: OfflineRecord) -> StoreResult<Option<OfflineRecord>> {
        self.check(StoreOp::SaveOffline)?;
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
        self.check(StoreOp::RemoveOffline)?;
        self.inner.remove_offline(user_id, file_id)
    }

    fn remove_offline_if(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check(StoreOp::RemoveOffline)?;
        self.inner.remove_offline_if(user_id, file_id, captured_at)
    }
}
