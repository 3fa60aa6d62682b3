//! The producer-facing sync service.

use crate::client::StoreClient;
use crate::collab::{Action, AllowAll, Authorizer, EventSink, InsightGenerator, NoInsights, NullSink};
use crate::config::EngineConfig;
use crate::dispatcher::{DeadLetter, DeadLetters, Dispatcher, LaneContext, SyncingMarks};
use crate::error::{SyncError, SyncResult};
use crate::events::EventEmitter;
use crate::ledger::VersionLedger;
use crate::offline::OfflineBuffer;
use crate::queue::{Command, QueueControl, SyncQueue};
use crate::resolver::MergeResolver;
use crate::stats::{SyncCounters, SyncStats};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use versync_protocol::{
    detect, ChangeSet, ConflictResolution, FileId, FileVersion, OfflineRecord, Platform,
    SyncStatus, SyncTask, TaskId, UserId, VersionDiff, VersionId,
};
use versync_store::Store;

/// Builder for [`SyncService`].
pub struct SyncServiceBuilder {
    store: Arc<dyn Store>,
    config: EngineConfig,
    authorizer: Arc<dyn Authorizer>,
    insights: Arc<dyn InsightGenerator>,
    sink: Arc<dyn EventSink>,
}

impl SyncServiceBuilder {
    /// Starts a builder over `store` with default collaborators.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            authorizer: Arc::new(AllowAll),
            insights: Arc::new(NoInsights),
            sink: Arc::new(NullSink),
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the authorization collaborator.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Sets the content-insight collaborator.
    pub fn with_insights(mut self, insights: Arc<dyn InsightGenerator>) -> Self {
        self.insights = insights;
        self
    }

    /// Sets the real-time delivery collaborator.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Starts the dispatcher and returns the service.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> SyncService {
        let config = self.config;
        let counters = Arc::new(SyncCounters::default());
        let dead_letters = Arc::new(DeadLetters::default());

        let client = StoreClient::new(self.store, config.store_timeout);
        let ledger = VersionLedger::new(
            client.clone(),
            self.authorizer,
            config.max_stale_reruns,
            Arc::clone(&counters),
        );
        let resolver = MergeResolver::new(self.insights, config.insight_timeout);
        let offline = OfflineBuffer::new(client.clone(), ledger.clone(), config.max_changes);
        let (emitter, forwarder) =
            EventEmitter::spawn(self.sink, config.event_buffer, Arc::clone(&counters));
        let (queue, rx) = SyncQueue::new(config.queue_capacity);

        let ctx = LaneContext {
            config: config.clone(),
            ledger: ledger.clone(),
            client: client.clone(),
            resolver: resolver.clone(),
            emitter: emitter.clone(),
            control: queue.control(),
            dead_letters: Arc::clone(&dead_letters),
            counters: Arc::clone(&counters),
            workers: Semaphore::new(config.max_parallel_files.max(1)),
            marks: SyncingMarks::default(),
        };
        let dispatcher = tokio::spawn(Dispatcher::new(rx, ctx).run());

        debug!(
            queue_capacity = config.queue_capacity,
            max_parallel_files = config.max_parallel_files,
            "sync service started"
        );

        SyncService {
            control: queue.control(),
            queue,
            config,
            client,
            ledger,
            resolver,
            offline,
            emitter,
            dead_letters,
            counters,
            dispatcher,
            forwarder,
        }
    }
}

/// File sync, versioning and conflict resolution over a [`Store`].
///
/// Producer-facing calls validate and authorize synchronously, then hand
/// work to a background dispatcher. Asynchronous outcomes are observable
/// through [`SyncService::status`] and the event sink.
///
/// # Example
///
/// ```rust,ignore
/// let service = SyncServiceBuilder::new(Arc::new(MemoryStore::new())).build();
/// let task = service
///     .sync(&file, &user, changes, Platform::Desktop, false)
///     .await?;
/// service.settle().await;
/// assert_eq!(service.status(&file).await?.status, SyncState::Synced);
/// ```
pub struct SyncService {
    config: EngineConfig,
    queue: SyncQueue,
    control: Arc<QueueControl>,
    client: StoreClient,
    ledger: VersionLedger,
    resolver: MergeResolver,
    offline: OfflineBuffer,
    emitter: EventEmitter,
    dead_letters: Arc<DeadLetters>,
    counters: Arc<SyncCounters>,
    dispatcher: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl SyncService {
    /// Creates a service over `store` with default configuration and collaborators.
    pub fn new(store: Arc<dyn Store>) -> Self {
        SyncServiceBuilder::new(store).build()
    }

    /// Returns a builder.
    pub fn builder(store: Arc<dyn Store>) -> SyncServiceBuilder {
        SyncServiceBuilder::new(store)
    }

    fn check_request(
        &self,
        file_id: &FileId,
        user_id: &UserId,
        change_set: &ChangeSet,
    ) -> SyncResult<()> {
        file_id.validate()?;
        user_id.validate()?;
        change_set.validate(self.config.max_changes)?;
        self.ledger.authorize(user_id, file_id, Action::Write)
    }

    /// Submits a change set.
    ///
    /// Online submissions are enqueued for the dispatcher. With `offline`
    /// set, the change set is stored in the offline buffer instead, and
    /// the returned task describes what a later replay will enqueue.
    ///
    /// # Errors
    ///
    /// Returns `Validation` or `PermissionDenied` before anything is
    /// queued, and `QueueClosed` after shutdown.
    pub async fn sync(
        &self,
        file_id: &FileId,
        user_id: &UserId,
        change_set: ChangeSet,
        platform: Platform,
        offline: bool,
    ) -> SyncResult<SyncTask> {
        self.check_request(file_id, user_id, &change_set)?;

        if offline {
            let record = self
                .offline
                .save(user_id, file_id, change_set, Some(platform))
                .await?;
            return Ok(record.to_task());
        }

        let task = SyncTask::new(file_id.clone(), user_id.clone(), change_set, platform);
        self.accept(task.clone()).await?;
        Ok(task)
    }

    async fn accept(&self, task: SyncTask) -> SyncResult<()> {
        self.queue.enqueue(task).await?;
        SyncCounters::bump(&self.counters.tasks_accepted);
        Ok(())
    }

    /// Checks a change set against the latest version without queueing it.
    ///
    /// A file with no history never conflicts.
    pub async fn resolve_conflicts(
        &self,
        file_id: &FileId,
        user_id: &UserId,
        change_set: ChangeSet,
    ) -> SyncResult<ConflictResolution> {
        self.check_request(file_id, user_id, &change_set)?;

        let Some(latest) = self.ledger.latest(file_id).await? else {
            return Ok(ConflictResolution::clean(change_set));
        };
        if detect(&latest.change_set, &change_set) {
            Ok(self.resolver.resolve(&latest.change_set, &change_set).await)
        } else {
            Ok(ConflictResolution::clean(change_set))
        }
    }

    /// Returns the sync status of a file. Untouched files are idle.
    pub async fn status(&self, file_id: &FileId) -> SyncResult<SyncStatus> {
        Ok(self
            .client
            .get_status(file_id)
            .await?
            .unwrap_or_else(|| SyncStatus::idle(file_id.clone())))
    }

    /// Returns every stored status row.
    pub async fn statuses(&self) -> SyncResult<Vec<SyncStatus>> {
        self.client.all_statuses().await
    }

    /// Returns the versions of a file, newest first.
    pub async fn history(&self, file_id: &FileId) -> SyncResult<Vec<FileVersion>> {
        self.ledger.history(file_id).await
    }

    /// Returns one version of a file.
    pub async fn version(&self, file_id: &FileId, version_id: VersionId) -> SyncResult<FileVersion> {
        self.ledger.version(file_id, version_id).await
    }

    /// Compares two versions of a file.
    pub async fn compare(
        &self,
        file_id: &FileId,
        from: VersionId,
        to: VersionId,
    ) -> SyncResult<VersionDiff> {
        self.ledger.compare(file_id, from, to).await
    }

    /// Appends a new version restoring the edits of `version_id`.
    ///
    /// Runs in the file's lane, after every task queued before it.
    pub async fn rollback(
        &self,
        file_id: &FileId,
        user_id: &UserId,
        version_id: VersionId,
    ) -> SyncResult<FileVersion> {
        file_id.validate()?;
        user_id.validate()?;
        self.ledger.authorize(user_id, file_id, Action::Write)?;

        let (reply, wait) = oneshot::channel();
        self.queue
            .submit(Command::Rollback {
                file_id: file_id.clone(),
                user_id: user_id.clone(),
                version_id,
                reply,
            })
            .await?;
        wait.await.map_err(|_| SyncError::QueueClosed)?
    }

    /// Enqueues every buffered offline edit of a user.
    pub async fn replay_offline(&self, user_id: &UserId) -> SyncResult<Vec<SyncTask>> {
        user_id.validate()?;
        let tasks = self.offline.replay_all(user_id, &self.queue).await?;
        for _ in &tasks {
            SyncCounters::bump(&self.counters.tasks_accepted);
        }
        Ok(tasks)
    }

    /// Buffers an edit captured while disconnected, replacing any previous one.
    pub async fn save_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
        change_set: ChangeSet,
    ) -> SyncResult<OfflineRecord> {
        self.offline.save(user_id, file_id, change_set, None).await
    }

    /// Lists the buffered offline edits of a user.
    pub async fn pending_offline(&self, user_id: &UserId) -> SyncResult<Vec<OfflineRecord>> {
        self.offline.pending(user_id).await
    }

    /// Deletes a buffered offline edit.
    pub async fn discard_offline(
        &self,
        user_id: &UserId,
        file_id: &FileId,
    ) -> SyncResult<OfflineRecord> {
        self.offline.discard(user_id, file_id).await
    }

    /// Lists tasks that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.list()
    }

    /// Re-enqueues a dead-lettered task.
    pub async fn retry_dead_letter(&self, task_id: TaskId) -> SyncResult<SyncTask> {
        let letter = self
            .dead_letters
            .take(task_id)
            .ok_or_else(|| SyncError::not_found(format!("dead letter {task_id}")))?;
        let task = letter.task;
        if let Err(e) = self.accept(task.clone()).await {
            self.dead_letters.push(DeadLetter {
                task,
                error: letter.error,
                attempts: letter.attempts,
                failed_at: letter.failed_at,
            });
            return Err(e);
        }
        info!(task_id = %task_id, file_id = %task.file_id, "dead letter re-enqueued");
        Ok(task)
    }

    /// Cancels a queued task. False if it was unknown or already dispatched.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.control.cancel(task_id)
    }

    /// Cancels every queued task, returning how many were cancelled.
    pub fn clear_queue(&self) -> usize {
        let count = self.control.clear();
        if count > 0 {
            info!(count, "sync queue cleared");
        }
        count
    }

    /// Resolves once every accepted command was processed and its events
    /// were handed to the sink.
    pub async fn settle(&self) {
        self.control.settle().await;
        self.emitter.flush().await;
    }

    /// Returns a snapshot of the sync counters.
    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    /// Closes the queue and waits for the dispatcher to drain.
    pub async fn shutdown(self) {
        let SyncService {
            queue,
            emitter,
            dispatcher,
            forwarder,
            ..
        } = self;
        drop(queue);
        drop(emitter);

        if let Err(e) = dispatcher.await {
            error!(error = %e, "dispatcher task failed");
        }
        if let Err(e) = forwarder.await {
            error!(error = %e, "event forwarder failed");
        }
        debug!("sync service stopped");
    }
}
