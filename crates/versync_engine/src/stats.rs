//! Sync counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the service and the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    pub(crate) tasks_accepted: AtomicU64,
    pub(crate) versions_appended: AtomicU64,
    pub(crate) duplicates_skipped: AtomicU64,
    pub(crate) conflicts: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) stale_reruns: AtomicU64,
    pub(crate) dead_lettered: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
}

impl SyncCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SyncStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SyncStats {
            tasks_accepted: read(&self.tasks_accepted),
            versions_appended: read(&self.versions_appended),
            duplicates_skipped: read(&self.duplicates_skipped),
            conflicts: read(&self.conflicts),
            retries: read(&self.retries),
            stale_reruns: read(&self.stale_reruns),
            dead_lettered: read(&self.dead_lettered),
            cancelled: read(&self.cancelled),
            events_dropped: read(&self.events_dropped),
        }
    }
}

/// Snapshot of the sync counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Tasks accepted by the queue.
    pub tasks_accepted: u64,
    /// Versions appended by the dispatcher.
    pub versions_appended: u64,
    /// Resubmissions that changed nothing.
    pub duplicates_skipped: u64,
    /// Tasks dropped because they conflicted.
    pub conflicts: u64,
    /// Retries after transient store failures.
    pub retries: u64,
    /// Detection re-runs after losing an append race.
    pub stale_reruns: u64,
    /// Tasks moved to the dead-letter list.
    pub dead_lettered: u64,
    /// Tasks cancelled before dispatch.
    pub cancelled: u64,
    /// Events dropped because the event buffer was full.
    pub events_dropped: u64,
}
