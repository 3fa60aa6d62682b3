//! Sync events and their fire-and-forget delivery.

use crate::collab::EventSink;
use crate::stats::SyncCounters;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use versync_protocol::{ConflictResolution, FileId, TaskId, UserId, VersionId};

/// An outcome pushed to the submitting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The task was committed, or was already reflected in the latest version.
    SyncComplete {
        /// The committed task.
        task_id: TaskId,
        /// Target file.
        file_id: FileId,
        /// Submitting user.
        user_id: UserId,
        /// The version now holding the task's edits.
        version_id: VersionId,
        /// True if nothing was appended because the edits were already present.
        duplicate: bool,
    },
    /// The task clashed with the latest version and was dropped.
    Conflict {
        /// The dropped task.
        task_id: TaskId,
        /// Target file.
        file_id: FileId,
        /// Submitting user.
        user_id: UserId,
        /// The views to choose from before resubmitting.
        resolution: ConflictResolution,
    },
    /// The task exhausted its retries and was dead-lettered.
    SyncError {
        /// The failed task.
        task_id: TaskId,
        /// Target file.
        file_id: FileId,
        /// Submitting user.
        user_id: UserId,
        /// The final error.
        message: String,
        /// Attempts made.
        attempts: u32,
    },
}

impl SyncEvent {
    /// Returns the event type name used on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SyncComplete { .. } => "sync_complete",
            SyncEvent::Conflict { .. } => "conflict",
            SyncEvent::SyncError { .. } => "sync_error",
        }
    }

    /// Returns the user the event is delivered to.
    pub fn target(&self) -> &UserId {
        match self {
            SyncEvent::SyncComplete { user_id, .. }
            | SyncEvent::Conflict { user_id, .. }
            | SyncEvent::SyncError { user_id, .. } => user_id,
        }
    }

    /// Returns the file the event is about.
    pub fn file_id(&self) -> &FileId {
        match self {
            SyncEvent::SyncComplete { file_id, .. }
            | SyncEvent::Conflict { file_id, .. }
            | SyncEvent::SyncError { file_id, .. } => file_id,
        }
    }
}

enum Outgoing {
    Event(SyncEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle that queues events for the forwarder task.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<Outgoing>,
    counters: Arc<SyncCounters>,
}

impl EventEmitter {
    /// Spawns the forwarder that hands events to `sink` in order.
    pub(crate) fn spawn(
        sink: Arc<dyn EventSink>,
        buffer: usize,
        counters: Arc<SyncCounters>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                match outgoing {
                    Outgoing::Event(event) => {
                        if let Err(e) = sink.emit(event.target(), event.event_type(), &event) {
                            warn!(
                                event_type = event.event_type(),
                                file_id = %event.file_id(),
                                error = %e,
                                "event delivery failed"
                            );
                        }
                    }
                    Outgoing::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("event forwarder stopped");
        });
        (Self { tx, counters }, handle)
    }

    /// Queues an event without waiting. A full buffer drops the event.
    pub(crate) fn emit(&self, event: SyncEvent) {
        match self.tx.try_send(Outgoing::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Outgoing::Event(event))) => {
                SyncCounters::bump(&self.counters.events_dropped);
                warn!(
                    event_type = event.event_type(),
                    file_id = %event.file_id(),
                    "event buffer full, dropping event"
                );
            }
            Err(_) => debug!("event forwarder gone, dropping event"),
        }
    }

    /// Waits until every event queued so far was handed to the sink.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Outgoing::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}
