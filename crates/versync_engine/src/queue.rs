//! The bounded task queue between producers and the dispatcher.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::debug;
use versync_protocol::{FileId, FileVersion, SyncTask, TaskId, UserId, VersionId};

/// Work routed to a file's lane.
pub(crate) enum Command {
    Sync(SyncTask),
    Rollback {
        file_id: FileId,
        user_id: UserId,
        version_id: VersionId,
        reply: oneshot::Sender<SyncResult<FileVersion>>,
    },
}

impl Command {
    pub(crate) fn file_id(&self) -> &FileId {
        match self {
            Command::Sync(task) => &task.file_id,
            Command::Rollback { file_id, .. } => file_id,
        }
    }
}

/// A queued command. The ticket is released once the command was processed.
pub(crate) struct Envelope {
    pub(crate) command: Command,
    pub(crate) ticket: PendingTicket,
}

/// Bookkeeping shared by producers and the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct QueueControl {
    /// Undispatched tasks and their cancellation flag.
    queued: Mutex<HashMap<TaskId, bool>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl QueueControl {
    fn ticket(self: &Arc<Self>) -> PendingTicket {
        self.pending.fetch_add(1, Ordering::SeqCst);
        PendingTicket {
            control: Arc::clone(self),
        }
    }

    /// Marks a queued task as cancelled. False if it was already dispatched.
    pub(crate) fn cancel(&self, task_id: TaskId) -> bool {
        match self.queued.lock().get_mut(&task_id) {
            Some(cancelled) if !*cancelled => {
                *cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Cancels every queued task, returning how many were newly cancelled.
    pub(crate) fn clear(&self) -> usize {
        let mut queued = self.queued.lock();
        let mut count = 0;
        for cancelled in queued.values_mut().filter(|cancelled| !**cancelled) {
            *cancelled = true;
            count += 1;
        }
        count
    }

    /// Returns true if `task_id` is queued and cancelled.
    pub(crate) fn is_cancelled(&self, task_id: TaskId) -> bool {
        self.queued.lock().get(&task_id).copied().unwrap_or(false)
    }

    /// Claims a task for dispatch, returning true if it had been cancelled.
    pub(crate) fn take(&self, task_id: TaskId) -> bool {
        self.queued.lock().remove(&task_id).unwrap_or(false)
    }

    /// Number of accepted commands not yet processed.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolves once no accepted command is waiting or in flight.
    pub(crate) async fn settle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts one accepted command until dropped.
#[derive(Debug)]
pub(crate) struct PendingTicket {
    control: Arc<QueueControl>,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        if self.control.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.control.idle.notify_waiters();
        }
    }
}

/// Producer handle of the queue.
#[derive(Clone)]
pub(crate) struct SyncQueue {
    tx: mpsc::Sender<Envelope>,
    control: Arc<QueueControl>,
}

impl SyncQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            control: Arc::new(QueueControl::default()),
        };
        (queue, rx)
    }

    pub(crate) fn control(&self) -> Arc<QueueControl> {
        Arc::clone(&self.control)
    }

    /// Enqueues a task, waiting while the queue is full.
    pub(crate) async fn enqueue(&self, task: SyncTask) -> SyncResult<()> {
        let task_id = task.task_id;
        self.control.queued.lock().insert(task_id, false);
        if let Err(e) = self.submit(Command::Sync(task)).await {
            self.control.queued.lock().remove(&task_id);
            return Err(e);
        }
        debug!(task_id = %task_id, "task accepted");
        Ok(())
    }

    /// Enqueues any command, waiting while the queue is full.
    pub(crate) async fn submit(&self, command: Command) -> SyncResult<()> {
        let envelope = Envelope {
            command,
            ticket: self.control.ticket(),
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SyncError::QueueClosed)
    }
}
