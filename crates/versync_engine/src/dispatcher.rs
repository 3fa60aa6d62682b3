//! The background consumer of the sync queue.
//!
//! Commands are routed to one lane per file. A lane processes its file's
//! commands strictly in enqueue order; lanes of different files run
//! concurrently, bounded by `max_parallel_files`. A lane that stays idle
//! closes itself; a later command for the file starts a new lane that
//! first waits for the old one, so ordering survives the hand-over.
//!
//! A sync task reports `syncing` as soon as the dispatcher routes it, even
//! while it waits behind other work. A task cancelled before it ran hands
//! the file back its earlier state once no other marked task remains.
//!
//! Per task the lane runs detection against the latest version, then
//! either appends or reports a conflict. Transient store failures are
//! retried with backoff inside the lane; exhausted tasks are parked as
//! dead letters. Nothing a task does can stop the dispatcher.

use crate::client::StoreClient;
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventEmitter, SyncEvent};
use crate::ledger::VersionLedger;
use crate::queue::{Command, Envelope, QueueControl};
use crate::resolver::MergeResolver;
use crate::stats::SyncCounters;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use versync_protocol::{
    detect, is_duplicate, FileId, FileVersion, Metadata, SyncState, SyncStatus, SyncTask,
    TaskId,
};

/// A task that exhausted its retries, parked for manual handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The failed task.
    pub task: SyncTask,
    /// The final error.
    pub error: String,
    /// Attempts made.
    pub attempts: u32,
    /// When the task was parked.
    pub failed_at: DateTime<Utc>,
}

/// The dead-letter list.
#[derive(Debug, Default)]
pub(crate) struct DeadLetters(Mutex<Vec<DeadLetter>>);

impl DeadLetters {
    pub(crate) fn push(&self, letter: DeadLetter) {
        self.0.lock().push(letter);
    }

    pub(crate) fn list(&self) -> Vec<DeadLetter> {
        self.0.lock().clone()
    }

    pub(crate) fn take(&self, task_id: TaskId) -> Option<DeadLetter> {
        let mut letters = self.0.lock();
        let index = letters.iter().position(|l| l.task.task_id == task_id)?;
        Some(letters.remove(index))
    }
}

/// Routed sync tasks per file that have not reached their lane yet.
#[derive(Debug, Default)]
pub(crate) struct SyncingMarks(Mutex<HashMap<FileId, Marked>>);

#[derive(Debug)]
struct Marked {
    /// State the file had before its first marked task, if it was read.
    prior: Option<SyncState>,
    tasks: HashSet<TaskId>,
}

impl SyncingMarks {
    fn mark(&self, task: &SyncTask, prior: Option<SyncState>) {
        self.0
            .lock()
            .entry(task.file_id.clone())
            .or_insert_with(|| Marked {
                prior,
                tasks: HashSet::new(),
            })
            .tasks
            .insert(task.task_id);
    }

    /// Drops the mark of `task`. Returns the file's earlier state if it
    /// was the last marked task of its file.
    fn unmark(&self, task: &SyncTask) -> Option<SyncState> {
        let mut marks = self.0.lock();
        let marked = marks.get_mut(&task.file_id)?;
        marked.tasks.remove(&task.task_id);
        if !marked.tasks.is_empty() {
            return None;
        }
        marks.remove(&task.file_id).and_then(|m| m.prior)
    }
}

/// Everything a lane needs to process commands.
pub(crate) struct LaneContext {
    pub(crate) config: EngineConfig,
    pub(crate) ledger: VersionLedger,
    pub(crate) client: StoreClient,
    pub(crate) resolver: MergeResolver,
    pub(crate) emitter: EventEmitter,
    pub(crate) control: Arc<QueueControl>,
    pub(crate) dead_letters: Arc<DeadLetters>,
    pub(crate) counters: Arc<SyncCounters>,
    pub(crate) workers: Semaphore,
    pub(crate) marks: SyncingMarks,
}

type LaneItem = (Envelope, OwnedSemaphorePermit);

struct Lane {
    tx: mpsc::UnboundedSender<LaneItem>,
    handle: JoinHandle<()>,
}

/// A committed task.
struct Commit {
    version: FileVersion,
    duplicate: bool,
}

/// Drains the queue into per-file lanes.
pub(crate) struct Dispatcher {
    rx: mpsc::Receiver<Envelope>,
    ctx: Arc<LaneContext>,
    lanes: HashMap<FileId, Lane>,
    inflight: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(rx: mpsc::Receiver<Envelope>, ctx: LaneContext) -> Self {
        let inflight = Arc::new(Semaphore::new(ctx.config.queue_capacity.max(1)));
        Self {
            rx,
            ctx: Arc::new(ctx),
            lanes: HashMap::new(),
            inflight,
        }
    }

    /// Runs until the queue is closed and every lane has drained.
    pub(crate) async fn run(mut self) {
        debug!("dispatcher started");
        loop {
            // Holding a permit before receiving keeps queue backpressure
            // in place while lanes are busy.
            let Ok(permit) = Arc::clone(&self.inflight).acquire_owned().await else {
                break;
            };
            let Some(envelope) = self.rx.recv().await else {
                break;
            };
            if let Command::Sync(task) = &envelope.command {
                self.ctx.mark_syncing(task).await;
            }
            self.route(envelope, permit);
            self.lanes.retain(|_, lane| !lane.handle.is_finished());
        }

        debug!(lanes = self.lanes.len(), "queue closed, draining lanes");
        for (file_id, lane) in self.lanes.drain() {
            drop(lane.tx);
            if let Err(e) = lane.handle.await {
                error!(file_id = %file_id, error = %e, "lane task failed");
            }
        }
        debug!("dispatcher stopped");
    }

    fn route(&mut self, envelope: Envelope, permit: OwnedSemaphorePermit) {
        let file_id = envelope.command.file_id().clone();
        let item = match self.lanes.get(&file_id) {
            Some(lane) => match lane.tx.send((envelope, permit)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => (envelope, permit),
        };

        let previous = self.lanes.remove(&file_id).map(|lane| lane.handle);
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::clone(&self.ctx);
        let lane_file = file_id.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!(file_id = %lane_file, error = %e, "previous lane task failed");
                }
            }
            run_lane(ctx, lane_file, item, rx).await;
        });
        debug!(file_id = %file_id, "lane started");
        self.lanes.insert(file_id, Lane { tx, handle });
    }
}

async fn run_lane(
    ctx: Arc<LaneContext>,
    file_id: FileId,
    first: LaneItem,
    mut rx: mpsc::UnboundedReceiver<LaneItem>,
) {
    ctx.process(first).await;
    loop {
        match timeout(ctx.config.lane_idle_timeout, rx.recv()).await {
            Ok(Some(item)) => ctx.process(item).await,
            Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Some(item) = rx.recv().await {
                    ctx.process(item).await;
                }
                break;
            }
        }
    }
    debug!(file_id = %file_id, "lane closed");
}

impl LaneContext {
    async fn process(&self, (envelope, _inflight): LaneItem) {
        let Envelope { command, ticket } = envelope;
        let Ok(_worker) = self.workers.acquire().await else {
            return;
        };

        match command {
            Command::Sync(task) => self.process_task(task).await,
            Command::Rollback {
                file_id,
                user_id,
                version_id,
                reply,
            } => {
                let result = self.ledger.rollback(&file_id, &user_id, version_id).await;
                let _ = reply.send(result);
            }
        }
        drop(ticket);
    }

    /// Reports a routed task's file as syncing before the task reaches its lane.
    async fn mark_syncing(&self, task: &SyncTask) {
        if self.control.is_cancelled(task.task_id) {
            return;
        }
        let prior = self.set_status(&task.file_id, SyncState::Syncing).await;
        self.marks.mark(task, prior);
    }

    async fn process_task(&self, task: SyncTask) {
        let prior = self.marks.unmark(&task);
        if self.control.take(task.task_id) {
            SyncCounters::bump(&self.counters.cancelled);
            debug!(task_id = %task.task_id, file_id = %task.file_id, "skipping cancelled task");
            if let Some(prior) = prior {
                self.restore_status(&task.file_id, prior).await;
            }
            return;
        }

        // An earlier task of the lane may have settled the file since routing.
        self.set_status(&task.file_id, SyncState::Syncing).await;

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_commit(&task).await {
                Ok(commit) => {
                    self.complete(&task, commit).await;
                    return;
                }
                Err(SyncError::Conflict(resolution)) => {
                    SyncCounters::bump(&self.counters.conflicts);
                    self.set_status(&task.file_id, SyncState::Conflict).await;
                    info!(
                        task_id = %task.task_id,
                        file_id = %task.file_id,
                        lines = ?resolution.conflicted_lines(),
                        "task conflicts with latest version"
                    );
                    self.emitter.emit(SyncEvent::Conflict {
                        task_id: task.task_id,
                        file_id: task.file_id.clone(),
                        user_id: task.user_id.clone(),
                        resolution: *resolution,
                    });
                    return;
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    SyncCounters::bump(&self.counters.retries);
                    let delay = self.config.retry.delay_for(attempts, &e);
                    warn!(
                        task_id = %task.task_id,
                        file_id = %task.file_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying task"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    self.fail(task, e, attempts).await;
                    return;
                }
            }
        }
    }

    /// Detects against the latest version and appends on success.
    ///
    /// Losing an append race re-runs detection, since the new latest
    /// version may now conflict.
    async fn try_commit(&self, task: &SyncTask) -> SyncResult<Commit> {
        let mut reruns = 0;
        loop {
            let latest = self.ledger.latest(&task.file_id).await?;
            let base = latest
                .as_ref()
                .map(|v| v.change_set.clone())
                .unwrap_or_default();

            if detect(&base, &task.change_set) {
                let resolution = self.resolver.resolve(&base, &task.change_set).await;
                return Err(SyncError::Conflict(Box::new(resolution)));
            }

            let expected = latest.as_ref().map(|v| v.version_id);
            if let Some(latest) = latest.filter(|v| is_duplicate(&v.change_set, &task.change_set)) {
                return Ok(Commit {
                    version: latest,
                    duplicate: true,
                });
            }

            let version = FileVersion::new(
                task.file_id.clone(),
                task.user_id.clone(),
                base.union(&task.change_set),
                task_metadata(task),
            );
            match self.ledger.append(version, expected).await {
                Ok(version) => {
                    return Ok(Commit {
                        version,
                        duplicate: false,
                    })
                }
                Err(SyncError::StaleVersion { .. }) if reruns < self.config.max_stale_reruns => {
                    reruns += 1;
                    SyncCounters::bump(&self.counters.stale_reruns);
                    warn!(
                        task_id = %task.task_id,
                        file_id = %task.file_id,
                        reruns,
                        "lost append race, re-running detection"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(&self, task: &SyncTask, commit: Commit) {
        if commit.duplicate {
            SyncCounters::bump(&self.counters.duplicates_skipped);
        } else {
            SyncCounters::bump(&self.counters.versions_appended);
        }
        self.set_status(&task.file_id, SyncState::Synced).await;
        info!(
            task_id = %task.task_id,
            file_id = %task.file_id,
            version_id = %commit.version.version_id,
            duplicate = commit.duplicate,
            "task synced"
        );
        self.emitter.emit(SyncEvent::SyncComplete {
            task_id: task.task_id,
            file_id: task.file_id.clone(),
            user_id: task.user_id.clone(),
            version_id: commit.version.version_id,
            duplicate: commit.duplicate,
        });
    }

    async fn fail(&self, task: SyncTask, err: SyncError, attempts: u32) {
        SyncCounters::bump(&self.counters.dead_lettered);
        self.set_status(&task.file_id, SyncState::Failed).await;
        info!(
            task_id = %task.task_id,
            file_id = %task.file_id,
            attempts,
            error = %err,
            "task dead-lettered"
        );
        let message = err.to_string();
        self.emitter.emit(SyncEvent::SyncError {
            task_id: task.task_id,
            file_id: task.file_id.clone(),
            user_id: task.user_id.clone(),
            message: message.clone(),
            attempts,
        });
        self.dead_letters.push(DeadLetter {
            task,
            error: message,
            attempts,
            failed_at: Utc::now(),
        });
    }

    /// Writes the status row and returns the state it replaced.
    ///
    /// A row already `syncing` is left alone. A failed write is logged
    /// and ignored.
    async fn set_status(&self, file_id: &FileId, next: SyncState) -> Option<SyncState> {
        let result: SyncResult<SyncState> = async {
            let mut status = self
                .client
                .get_status(file_id)
                .await?
                .unwrap_or_else(|| SyncStatus::idle(file_id.clone()));
            let prior = status.status;
            if next == SyncState::Syncing && prior == next {
                return Ok(prior);
            }
            if !prior.can_transition_to(next) {
                debug!(file_id = %file_id, from = %prior, to = %next, "unexpected status transition");
            }
            status.advance(next, Utc::now());
            self.client.put_status(status).await?;
            Ok(prior)
        }
        .await;

        match result {
            Ok(prior) => Some(prior),
            Err(e) => {
                warn!(file_id = %file_id, status = %next, error = %e, "failed to write sync status");
                None
            }
        }
    }

    /// Puts back `prior` if the file still shows `syncing`.
    async fn restore_status(&self, file_id: &FileId, prior: SyncState) {
        let result: SyncResult<()> = async {
            let Some(mut status) = self.client.get_status(file_id).await? else {
                return Ok(());
            };
            if status.status != SyncState::Syncing || prior == SyncState::Syncing {
                return Ok(());
            }
            status.status = prior;
            self.client.put_status(status).await
        }
        .await;

        match result {
            Ok(()) => debug!(file_id = %file_id, status = %prior, "restored status of cancelled task"),
            Err(e) => warn!(file_id = %file_id, error = %e, "failed to restore sync status"),
        }
    }
}

fn task_metadata(task: &SyncTask) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("task_id".to_string(), task.task_id.to_string());
    metadata.insert("platform".to_string(), task.platform.to_string());
    if task.offline {
        metadata.insert("offline".to_string(), "true".to_string());
    }
    metadata
}
