//! End-to-end tests for the sync service.

use std::sync::Arc;
use std::time::Duration;
use versync_engine::{
    Action, EngineConfig, SyncError, SyncEvent, SyncService, ROLLBACK_OF,
};
use versync_protocol::{
    ChangeSet, EditOp, FileId, FileVersion, LineEdit, MergedLine, Metadata, Platform, SyncState,
    SyncStatus, UserId, VersionId,
};
use versync_store::{DirStore, MemoryStore, StatusStore, VersionStore};
use versync_testkit::prelude::*;

struct Harness {
    store: Arc<FlakyStore>,
    sink: Arc<RecordingSink>,
    service: SyncService,
}

fn harness_with(store: FlakyStore, config: EngineConfig) -> Harness {
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::new());
    let service = SyncService::builder(store.clone())
        .with_config(config)
        .with_event_sink(sink.clone())
        .build();
    Harness {
        store,
        sink,
        service,
    }
}

fn harness() -> Harness {
    harness_with(FlakyStore::new(MemoryStore::new()), fast_config())
}

fn file() -> FileId {
    FileId::new("notes.md")
}

fn alice() -> UserId {
    UserId::new("alice")
}

fn bob() -> UserId {
    UserId::new("bob")
}

#[tokio::test]
async fn rapid_non_overlapping_syncs_all_land() {
    let h = harness();
    for line in 1..=4 {
        h.service
            .sync(&file(), &alice(), inserts(&[(line, "text")]), Platform::Desktop, false)
            .await
            .unwrap();
    }
    h.service.settle().await;

    let history = h.service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].change_set.lines(), vec![1, 2, 3, 4]);
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
    assert_eq!(h.sink.count("sync_complete"), 4);
    assert_eq!(h.service.stats().versions_appended, 4);
}

#[tokio::test]
async fn addition_produces_union_version() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(1, "a")]), Platform::Web, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &bob(), edits(&[(2, "b")]), Platform::Web, false)
        .await
        .unwrap();
    h.service.settle().await;

    let latest = h.service.history(&file()).await.unwrap().remove(0);
    assert_eq!(latest.change_set, edits(&[(1, "a"), (2, "b")]));
    assert_eq!(latest.author_id, bob());
    assert_eq!(latest.metadata.get("platform").map(String::as_str), Some("web"));
}

#[tokio::test]
async fn same_line_clash_is_reported_not_applied() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(3, "foo")]), Platform::Desktop, false)
        .await
        .unwrap();
    let task = h
        .service
        .sync(&file(), &bob(), edits(&[(3, "bar")]), Platform::Mobile, false)
        .await
        .unwrap();
    h.service.settle().await;

    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Conflict
    );

    let conflicts = h.sink.of_type("conflict");
    assert_eq!(conflicts.len(), 1);
    let SyncEvent::Conflict {
        task_id,
        user_id,
        resolution,
        ..
    } = &conflicts[0]
    else {
        panic!("expected a conflict event");
    };
    assert_eq!(*task_id, task.task_id);
    assert_eq!(*user_id, bob());
    assert!(resolution.conflict);
    assert_eq!(
        resolution.merged_changes,
        vec![MergedLine::Conflict {
            line: 3,
            yours: LineEdit::update(3, "bar"),
            theirs: LineEdit::update(3, "foo"),
        }]
    );

    let recorded = h.sink.recorded();
    assert_eq!(recorded.last().map(|r| r.target.clone()), Some(bob()));
}

#[tokio::test]
async fn conflict_state_returns_to_synced_on_next_task() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(1, "foo")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &bob(), edits(&[(1, "bar")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Conflict
    );

    // Bob picks the stored view plus a new line and resubmits.
    let resolution = h
        .service
        .resolve_conflicts(&file(), &bob(), edits(&[(1, "bar")]))
        .await
        .unwrap();
    let mut chosen = resolution.use_theirs().edits().to_vec();
    chosen.push(LineEdit::insert(2, "more"));
    h.service
        .sync(&file(), &bob(), chosen.into(), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    let status = h.service.status(&file()).await.unwrap();
    assert_eq!(status.status, SyncState::Synced);
    assert!(status.last_synced_at.is_some());
    assert_eq!(h.service.history(&file()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_conflicting_syncs_append_exactly_once() {
    let h = harness();
    let (f, al, bo) = (file(), alice(), bob());
    let (a, b) = tokio::join!(
        h.service
            .sync(&f, &al, edits(&[(5, "left")]), Platform::Desktop, false),
        h.service
            .sync(&f, &bo, edits(&[(5, "right")]), Platform::Web, false),
    );
    a.unwrap();
    b.unwrap();
    h.service.settle().await;

    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(h.sink.count("sync_complete"), 1);
    assert_eq!(h.sink.count("conflict"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_dispatchers_never_both_append() {
    let store = Arc::new(MemoryStore::new());
    let sink_a = Arc::new(RecordingSink::new());
    let sink_b = Arc::new(RecordingSink::new());
    let service_a = SyncService::builder(store.clone())
        .with_config(fast_config())
        .with_event_sink(sink_a.clone())
        .build();
    let service_b = SyncService::builder(store.clone())
        .with_config(fast_config())
        .with_event_sink(sink_b.clone())
        .build();

    for round in 0..10u32 {
        let file = FileId::new(format!("race-{round}.txt"));
        let (al, bo) = (alice(), bob());
        let (a, b) = tokio::join!(
            service_a.sync(&file, &al, edits(&[(1, "alice")]), Platform::Desktop, false),
            service_b.sync(&file, &bo, edits(&[(1, "bob")]), Platform::Desktop, false),
        );
        a.unwrap();
        b.unwrap();
    }
    service_a.settle().await;
    service_b.settle().await;

    for round in 0..10u32 {
        let file = FileId::new(format!("race-{round}.txt"));
        assert_eq!(store.history(&file).unwrap().len(), 1);
    }
    let completes = sink_a.count("sync_complete") + sink_b.count("sync_complete");
    let conflicts = sink_a.count("conflict") + sink_b.count("conflict");
    assert_eq!(completes, 10);
    assert_eq!(conflicts, 10);
}

fn rival(changes: ChangeSet) -> FileVersion {
    FileVersion::new(file(), UserId::new("carol"), changes, Metadata::new())
}

fn rival_harness() -> (Arc<RivalStore>, Arc<RecordingSink>, SyncService) {
    let store = Arc::new(RivalStore::new(MemoryStore::new()));
    let sink = Arc::new(RecordingSink::new());
    let service = SyncService::builder(store.clone())
        .with_config(fast_config())
        .with_event_sink(sink.clone())
        .build();
    (store, sink, service)
}

#[tokio::test]
async fn lost_race_against_clashing_edit_becomes_a_conflict() {
    let (store, sink, service) = rival_harness();
    store.arm(rival(edits(&[(1, "theirs")])));

    service
        .sync(&file(), &alice(), edits(&[(1, "mine")]), Platform::Desktop, false)
        .await
        .unwrap();
    service.settle().await;

    assert!(!store.is_armed(&file()));
    let history = service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].author_id, UserId::new("carol"));
    assert_eq!(
        service.status(&file()).await.unwrap().status,
        SyncState::Conflict
    );
    assert_eq!(sink.count("conflict"), 1);
    assert_eq!(sink.count("sync_complete"), 0);

    let stats = service.stats();
    assert_eq!(stats.stale_reruns, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.versions_appended, 0);
}

#[tokio::test]
async fn lost_race_against_identical_edit_is_a_duplicate() {
    let (store, sink, service) = rival_harness();
    store.arm(rival(edits(&[(1, "mine")])));

    service
        .sync(&file(), &alice(), edits(&[(1, "mine")]), Platform::Desktop, false)
        .await
        .unwrap();
    service.settle().await;

    assert_eq!(service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(
        service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
    assert!(matches!(
        sink.of_type("sync_complete").as_slice(),
        [SyncEvent::SyncComplete { duplicate: true, .. }]
    ));

    let stats = service.stats();
    assert_eq!(stats.stale_reruns, 1);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(stats.versions_appended, 0);
}

#[tokio::test]
async fn lost_race_against_other_lines_appends_on_top() {
    let (store, _sink, service) = rival_harness();
    store.arm(rival(edits(&[(2, "theirs")])));

    service
        .sync(&file(), &alice(), edits(&[(1, "mine")]), Platform::Desktop, false)
        .await
        .unwrap();
    service.settle().await;

    let history = service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change_set, edits(&[(1, "mine"), (2, "theirs")]));
    assert_eq!(history[1].author_id, UserId::new("carol"));
    assert_eq!(service.stats().stale_reruns, 1);
}

#[tokio::test]
async fn rollback_retries_on_top_of_a_rival_append() {
    let (store, _sink, service) = rival_harness();
    service
        .sync(&file(), &alice(), edits(&[(1, "a")]), Platform::Desktop, false)
        .await
        .unwrap();
    service
        .sync(&file(), &alice(), edits(&[(2, "b")]), Platform::Desktop, false)
        .await
        .unwrap();
    service.settle().await;
    let first = service.history(&file()).await.unwrap()[1].version_id;

    store.arm(rival(edits(&[(1, "a"), (2, "b"), (3, "c")])));
    let restored = service.rollback(&file(), &bob(), first).await.unwrap();

    let history = service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].version_id, restored.version_id);
    assert_eq!(history[0].change_set, edits(&[(1, "a")]));
    assert_eq!(history[1].author_id, UserId::new("carol"));
    assert_eq!(service.stats().stale_reruns, 1);
}

#[tokio::test]
async fn identical_resubmission_appends_nothing() {
    let h = harness();
    let changes = edits(&[(1, "same"), (2, "lines")]);
    h.service
        .sync(&file(), &alice(), changes.clone(), Platform::Desktop, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &alice(), changes, Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    let completes = h.sink.of_type("sync_complete");
    assert!(matches!(
        completes.as_slice(),
        [
            SyncEvent::SyncComplete { duplicate: false, .. },
            SyncEvent::SyncComplete { duplicate: true, .. }
        ]
    ));
    assert_eq!(h.service.stats().duplicates_skipped, 1);
}

#[tokio::test]
async fn three_store_timeouts_fail_the_task_once() {
    let store = FlakyStore::new(MemoryStore::new()).stall(
        StoreOp::Latest,
        3,
        Duration::from_millis(150),
    );
    let h = harness_with(
        store,
        fast_config().with_store_timeout(Duration::from_millis(30)),
    );

    let task = h
        .service
        .sync(&file(), &alice(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Failed
    );
    let errors = h.sink.of_type("sync_error");
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        SyncEvent::SyncError { attempts: 3, task_id, .. } if *task_id == task.task_id
    ));
    assert_eq!(h.sink.count("sync_complete"), 0);
    assert!(h.service.history(&file()).await.unwrap().is_empty());

    let letters = h.service.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 3);
    let stats = h.service.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.dead_lettered, 1);

    // Faults are spent; the parked task can go through now.
    h.service.retry_dead_letter(task.task_id).await.unwrap();
    h.service.settle().await;
    assert!(h.service.dead_letters().is_empty());
    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
    assert!(matches!(
        h.service.retry_dead_letter(task.task_id).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn transient_append_failures_are_retried() {
    let store = FlakyStore::new(MemoryStore::new()).fail(StoreOp::Append, 2);
    let h = harness_with(store, fast_config());

    h.service
        .sync(&file(), &alice(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    assert_eq!(h.store.calls(StoreOp::Append), 3);
    assert_eq!(h.store.inner().version_count(), 1);
    assert_eq!(h.service.stats().retries, 2);
    assert_eq!(h.sink.count("sync_error"), 0);
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
}

#[tokio::test]
async fn status_write_failures_do_not_fail_the_task() {
    let store = FlakyStore::new(MemoryStore::new()).fail(StoreOp::PutStatus, 1);
    let h = harness_with(store, fast_config());

    h.service
        .sync(&file(), &alice(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
}

#[tokio::test]
async fn malformed_or_unauthorized_requests_are_rejected_synchronously() {
    let authorizer = Arc::new(AllowList::new().grant("alice", Action::Write));
    let store = Arc::new(MemoryStore::new());
    let service = SyncService::builder(store.clone())
        .with_config(fast_config().with_max_changes(2))
        .with_authorizer(authorizer)
        .build();

    let err = service
        .sync(&file(), &alice(), edits(&[]), Platform::Web, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = service
        .sync(&file(), &alice(), edits(&[(1, "a"), (2, "b"), (3, "c")]), Platform::Web, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = service
        .sync(&FileId::new(" "), &alice(), edits(&[(1, "a")]), Platform::Web, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = service
        .sync(&file(), &bob(), edits(&[(1, "a")]), Platform::Web, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::PermissionDenied { action: Action::Write, .. }
    ));

    let err = service
        .resolve_conflicts(&file(), &bob(), edits(&[(1, "a")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PermissionDenied { .. }));

    service.settle().await;
    assert_eq!(service.stats().tasks_accepted, 0);
    assert_eq!(store.version_count(), 0);
}

#[tokio::test]
async fn resolve_conflicts_without_history_is_clean() {
    let h = harness();
    let resolution = h
        .service
        .resolve_conflicts(&file(), &alice(), edits(&[(1, "x")]))
        .await
        .unwrap();
    assert!(!resolution.conflict);
    assert_eq!(resolution.your_changes, edits(&[(1, "x")]));
    assert!(resolution.merged_changes.is_empty());
}

#[tokio::test]
async fn resolve_conflicts_asks_insights_for_conflicted_lines_only() {
    let insights = Arc::new(StaticInsights::new(["merged text"]));
    let store = Arc::new(MemoryStore::new());
    let service = SyncService::builder(store)
        .with_config(fast_config())
        .with_insights(insights.clone())
        .build();

    service
        .sync(&file(), &alice(), edits(&[(1, "one"), (2, "two")]), Platform::Web, false)
        .await
        .unwrap();
    service.settle().await;

    let resolution = service
        .resolve_conflicts(&file(), &bob(), edits(&[(1, "one"), (2, "TWO"), (9, "nine")]))
        .await
        .unwrap();
    assert!(resolution.conflict);
    assert_eq!(resolution.conflicted_lines(), vec![2]);
    assert_eq!(resolution.suggestions, vec!["merged text".to_string()]);
    assert_eq!(insights.calls(), vec![edits(&[(2, "TWO")])]);

    // Nothing was queued or appended by resolving.
    assert_eq!(service.history(&file()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn slow_insights_leave_suggestions_empty() {
    let store = Arc::new(MemoryStore::new());
    let service = SyncService::builder(store)
        .with_config(fast_config())
        .with_insights(Arc::new(SlowInsights::new(Duration::from_millis(500))))
        .build();

    service
        .sync(&file(), &alice(), edits(&[(3, "foo")]), Platform::Web, false)
        .await
        .unwrap();
    service.settle().await;

    let resolution = service
        .resolve_conflicts(&file(), &bob(), edits(&[(3, "bar")]))
        .await
        .unwrap();
    assert!(resolution.conflict);
    assert!(resolution.suggestions.is_empty());
}

#[tokio::test]
async fn rollback_appends_and_never_shrinks_history() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(1, "v1")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &alice(), edits(&[(2, "v2")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    let history = h.service.history(&file()).await.unwrap();
    let first = history[1].version_id;

    let restored = h.service.rollback(&file(), &bob(), first).await.unwrap();
    assert_eq!(restored.change_set, edits(&[(1, "v1")]));
    assert_eq!(
        restored.metadata.get(ROLLBACK_OF),
        Some(&first.to_string())
    );

    let history = h.service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].version_id, restored.version_id);

    let err = h
        .service
        .rollback(&file(), &bob(), VersionId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    let err = h
        .service
        .rollback(&FileId::new("empty.txt"), &bob(), first)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert_eq!(h.service.history(&file()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn rollback_runs_after_queued_tasks() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(1, "v1")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;
    let first = h.service.history(&file()).await.unwrap()[0].version_id;

    h.service
        .sync(&file(), &alice(), edits(&[(2, "v2")]), Platform::Desktop, false)
        .await
        .unwrap();
    let restored = h.service.rollback(&file(), &alice(), first).await.unwrap();

    let history = h.service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].version_id, restored.version_id);
    assert_eq!(history[1].change_set.lines(), vec![1, 2]);
}

#[tokio::test]
async fn compare_and_version_lookup() {
    let h = harness();
    h.service
        .sync(&file(), &alice(), edits(&[(1, "a")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &alice(), edits(&[(2, "b")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;

    let history = h.service.history(&file()).await.unwrap();
    let (newer, older) = (history[0].version_id, history[1].version_id);

    let diff = h.service.compare(&file(), older, newer).await.unwrap();
    assert_eq!(diff.added, vec![LineEdit::update(2, "b")]);
    assert!(diff.removed.is_empty());
    assert!(diff.changed.is_empty());

    assert_eq!(
        h.service.version(&file(), older).await.unwrap().version_id,
        older
    );
    assert!(matches!(
        h.service.version(&file(), VersionId::generate()).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn offline_sync_buffers_until_replay() {
    let h = harness();
    let task = h
        .service
        .sync(&file(), &alice(), edits(&[(1, "draft")]), Platform::Mobile, true)
        .await
        .unwrap();
    assert!(task.offline);
    h.service.settle().await;

    assert!(h.service.history(&file()).await.unwrap().is_empty());
    let pending = h.service.pending_offline(&alice()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].platform, Some(Platform::Mobile));

    let replayed = h.service.replay_offline(&alice()).await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].offline);
    h.service.settle().await;

    let history = h.service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].metadata.get("offline").map(String::as_str),
        Some("true")
    );
    assert!(h.service.pending_offline(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_slot_keeps_only_the_latest_capture() {
    let h = harness();
    h.service
        .save_offline(&alice(), &file(), edits(&[(1, "first")]))
        .await
        .unwrap();
    h.service
        .save_offline(&alice(), &file(), edits(&[(1, "second")]))
        .await
        .unwrap();

    let pending = h.service.pending_offline(&alice()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].change_set, edits(&[(1, "second")]));
    assert!(h.service.pending_offline(&bob()).await.unwrap().is_empty());
}

#[tokio::test]
async fn replaying_the_same_record_twice_appends_once() {
    // The first delete fails, as if the process died right after the
    // queue accepted the replayed task.
    let store = FlakyStore::new(MemoryStore::new()).fail(StoreOp::RemoveOffline, 1);
    let h = harness_with(store, fast_config());

    h.service
        .save_offline(&alice(), &file(), edits(&[(4, "offline edit")]))
        .await
        .unwrap();

    assert_eq!(h.service.replay_offline(&alice()).await.unwrap().len(), 1);
    h.service.settle().await;
    assert_eq!(h.service.pending_offline(&alice()).await.unwrap().len(), 1);

    assert_eq!(h.service.replay_offline(&alice()).await.unwrap().len(), 1);
    h.service.settle().await;

    assert_eq!(h.service.history(&file()).await.unwrap().len(), 1);
    assert!(h.service.pending_offline(&alice()).await.unwrap().is_empty());
    assert_eq!(h.sink.count("conflict"), 0);
    assert_eq!(h.service.stats().duplicates_skipped, 1);
}

#[tokio::test]
async fn discard_offline_requires_a_record() {
    let h = harness();
    h.service
        .save_offline(&alice(), &file(), edits(&[(1, "x")]))
        .await
        .unwrap();

    let removed = h.service.discard_offline(&alice(), &file()).await.unwrap();
    assert_eq!(removed.change_set, edits(&[(1, "x")]));
    assert!(matches!(
        h.service.discard_offline(&alice(), &file()).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn offline_save_is_permission_checked() {
    let authorizer = Arc::new(AllowList::new().grant_file("alice", "notes.md", Action::Write));
    let service = SyncService::builder(Arc::new(MemoryStore::new()))
        .with_config(fast_config())
        .with_authorizer(authorizer)
        .build();

    service
        .save_offline(&alice(), &file(), edits(&[(1, "ok")]))
        .await
        .unwrap();
    assert!(matches!(
        service
            .save_offline(&alice(), &FileId::new("other.md"), edits(&[(1, "no")]))
            .await,
        Err(SyncError::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn queued_tasks_can_be_cancelled() {
    // The first task stalls in the store, holding the lane while the
    // next ones wait in it.
    let store = FlakyStore::new(MemoryStore::new()).stall(
        StoreOp::Latest,
        1,
        Duration::from_millis(100),
    );
    let h = harness_with(store, fast_config().with_store_timeout(Duration::from_secs(2)));

    h.service
        .sync(&file(), &alice(), edits(&[(1, "kept")]), Platform::Desktop, false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = h
        .service
        .sync(&file(), &alice(), edits(&[(2, "cancelled")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service
        .sync(&file(), &alice(), edits(&[(3, "cleared")]), Platform::Desktop, false)
        .await
        .unwrap();

    assert!(h.service.cancel(second.task_id));
    assert!(!h.service.cancel(second.task_id));
    assert_eq!(h.service.clear_queue(), 1);
    h.service.settle().await;

    let history = h.service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_set, edits(&[(1, "kept")]));
    assert_eq!(h.service.stats().cancelled, 2);
    assert_eq!(h.sink.count("sync_complete"), 1);
    assert!(!h.service.cancel(second.task_id));
}

/// One worker, held by a stalled task on another file, so tasks of
/// `file()` wait in their lane. `file()` starts out in conflict.
async fn blocked_worker_harness() -> Harness {
    let store = FlakyStore::new(MemoryStore::new()).stall(
        StoreOp::Latest,
        1,
        Duration::from_millis(150),
    );
    let h = harness_with(
        store,
        fast_config()
            .with_max_parallel_files(1)
            .with_store_timeout(Duration::from_secs(2)),
    );
    h.store
        .put_status(SyncStatus {
            file_id: file(),
            status: SyncState::Conflict,
            last_synced_at: None,
        })
        .unwrap();
    h.service
        .sync(&FileId::new("busy.md"), &bob(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    h
}

#[tokio::test]
async fn waiting_task_reports_syncing_before_it_runs() {
    let h = blocked_worker_harness().await;

    h.service
        .sync(&file(), &alice(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(h.service.history(&file()).await.unwrap().is_empty());
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Syncing
    );

    h.service.settle().await;
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );
}

#[tokio::test]
async fn cancelled_waiting_task_restores_earlier_status() {
    let h = blocked_worker_harness().await;

    let task = h
        .service
        .sync(&file(), &alice(), edits(&[(1, "x")]), Platform::Desktop, false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Syncing
    );

    assert!(h.service.cancel(task.task_id));
    h.service.settle().await;

    assert!(h.service.history(&file()).await.unwrap().is_empty());
    assert_eq!(
        h.service.status(&file()).await.unwrap().status,
        SyncState::Conflict
    );
    assert_eq!(h.service.stats().cancelled, 1);
}

#[tokio::test]
async fn untouched_files_are_idle() {
    let h = harness();
    let status = h.service.status(&FileId::new("fresh.txt")).await.unwrap();
    assert_eq!(status.status, SyncState::Idle);
    assert!(status.last_synced_at.is_none());
    assert!(h.service.statuses().await.unwrap().is_empty());
}

#[tokio::test]
async fn delivery_failures_do_not_disturb_dispatch() {
    let sink = Arc::new(RecordingSink::failing());
    let service = SyncService::builder(Arc::new(MemoryStore::new()))
        .with_config(fast_config())
        .with_event_sink(sink.clone())
        .build();

    for line in 1..=3 {
        service
            .sync(&file(), &alice(), edits(&[(line, "x")]), Platform::Web, false)
            .await
            .unwrap();
    }
    service.settle().await;

    assert_eq!(sink.count("sync_complete"), 3);
    assert_eq!(service.history(&file()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn files_are_processed_independently() {
    let h = harness_with(
        FlakyStore::new(MemoryStore::new()),
        fast_config().with_max_parallel_files(2),
    );
    for n in 0..6u32 {
        let file = FileId::new(format!("file-{}.txt", n % 3));
        h.service
            .sync(&file, &alice(), inserts(&[(n + 1, "line")]), Platform::Desktop, false)
            .await
            .unwrap();
    }
    h.service.settle().await;

    for n in 0..3u32 {
        let file = FileId::new(format!("file-{n}.txt"));
        let history = h.service.history(&file).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_set.lines(), vec![n + 1, n + 4]);
        assert!(history[0]
            .change_set
            .iter()
            .all(|edit| edit.op == EditOp::Insert));
    }
}

#[tokio::test]
async fn lanes_restart_after_idling() {
    let h = harness_with(
        FlakyStore::new(MemoryStore::new()),
        fast_config().with_lane_idle_timeout(Duration::from_millis(10)),
    );
    h.service
        .sync(&file(), &alice(), edits(&[(1, "a")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.service
        .sync(&file(), &alice(), edits(&[(2, "b")]), Platform::Desktop, false)
        .await
        .unwrap();
    h.service.settle().await;
    assert_eq!(h.service.history(&file()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn shutdown_drains_accepted_tasks() {
    let store = Arc::new(MemoryStore::new());
    let service = SyncService::builder(store.clone())
        .with_config(fast_config())
        .build();
    for line in 1..=3 {
        service
            .sync(&file(), &alice(), edits(&[(line, "x")]), Platform::Desktop, false)
            .await
            .unwrap();
    }
    service.shutdown().await;
    assert_eq!(store.history(&file()).unwrap().len(), 3);
}

#[tokio::test]
async fn dir_store_keeps_history_and_buffer_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data");

    {
        let store = Arc::new(DirStore::open(&path, true).unwrap());
        let service = SyncService::builder(store)
            .with_config(fast_config())
            .build();
        service
            .sync(&file(), &alice(), edits(&[(1, "durable")]), Platform::Desktop, false)
            .await
            .unwrap();
        service
            .save_offline(&bob(), &file(), edits(&[(2, "later")]))
            .await
            .unwrap();
        service.shutdown().await;
    }

    let store = Arc::new(DirStore::open(&path, false).unwrap());
    let service = SyncService::builder(store)
        .with_config(fast_config())
        .build();
    assert_eq!(service.history(&file()).await.unwrap().len(), 1);
    assert_eq!(
        service.status(&file()).await.unwrap().status,
        SyncState::Synced
    );

    service.replay_offline(&bob()).await.unwrap();
    service.settle().await;
    let history = service.history(&file()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change_set, edits(&[(1, "durable"), (2, "later")]));
}
