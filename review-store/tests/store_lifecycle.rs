//! Integration tests for the task store, revision markers and settings cache.
//!
//! Exercises: open + migrate, at-most-one task rule, batch progress,
//! finalize invariants, restart recovery, marker compare-and-advance.

use chrono::Utc;
use review_store::models::{
    BatchResult, BatchStatus, IssueSeverity, NewTask, ReviewIssue, ReviewStrategy, RevisionKind,
    SummaryFields, TaskFilter, TaskStatus,
};
use review_store::{Store, StoreError};

fn new_task(revision: &str) -> NewTask {
    NewTask {
        repo_id: "repo-1".into(),
        project_name: "demo".into(),
        strategy: ReviewStrategy::Commit,
        revision_ref: revision.into(),
        base_ref: None,
        branch: "main".into(),
        author_name: Some("alice".into()),
        author_email: None,
        poll_kind: None,
        marker_prev: None,
    }
}

#[tokio::test]
async fn duplicate_task_rejected_while_non_terminal() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();

    let first = tasks.create(new_task("abc123")).await.unwrap();
    assert_eq!(first.status, TaskStatus::Pending);

    let err = tasks.create(new_task("abc123")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateTask { .. }));

    // A different strategy for the same revision is a distinct task.
    let mut mr = new_task("abc123");
    mr.strategy = ReviewStrategy::MergeRequest;
    tasks.create(mr).await.unwrap();

    // Once the first task is terminal the same (repo, strategy, revision)
    // may be created again.
    tasks
        .finalize(
            first.task_id,
            TaskStatus::Completed,
            &[],
            SummaryFields::default(),
            None,
        )
        .await
        .unwrap();
    tasks.create(new_task("abc123")).await.unwrap();
}

#[tokio::test]
async fn finalize_is_write_once() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();
    let task = tasks.create(new_task("deadbeef")).await.unwrap();

    tasks
        .finalize(
            task.task_id,
            TaskStatus::Cancelled,
            &[],
            SummaryFields::default(),
            None,
        )
        .await
        .unwrap();

    let err = tasks
        .finalize(
            task.task_id,
            TaskStatus::Completed,
            &[],
            SummaryFields::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TerminalTask { .. }));
}

#[tokio::test]
async fn batch_progress_and_issue_persistence() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();
    let task = tasks.create(new_task("feed0001")).await.unwrap();

    assert!(tasks.mark_processing(task.task_id).await.unwrap());
    tasks
        .set_plan(task.task_id, 2, &["a.rs".into(), "b.rs".into()])
        .await
        .unwrap();
    tasks
        .update_progress(
            task.task_id,
            0,
            BatchResult {
                index: 0,
                status: BatchStatus::Success,
                files: vec!["a.rs".into()],
                error: None,
            },
        )
        .await
        .unwrap();
    tasks
        .update_progress(
            task.task_id,
            1,
            BatchResult {
                index: 1,
                status: BatchStatus::Failed,
                files: vec!["b.rs".into()],
                error: Some("timeout".into()),
            },
        )
        .await
        .unwrap();

    let issues = vec![ReviewIssue {
        severity: IssueSeverity::Critical,
        title: "sql injection".into(),
        description: "raw string concatenation in query".into(),
        file_path: Some("a.rs".into()),
        line_number: Some(42),
        code_snippet: None,
        suggestion: Some("use bind parameters".into()),
        category: Some("security".into()),
    }];
    let fields = SummaryFields {
        issues_count: 1,
        critical_count: 1,
        quality_score: Some(90),
        ..Default::default()
    };
    tasks
        .finalize(
            task.task_id,
            TaskStatus::Completed,
            &issues,
            fields,
            Some("report text".into()),
        )
        .await
        .unwrap();

    let (full, stored_issues) = tasks.get_full(task.task_id).await.unwrap();
    assert_eq!(full.status, TaskStatus::Completed);
    assert_eq!(full.batch_total, 2);
    assert_eq!(full.batch_current, 2);
    assert_eq!(full.batch_results.len(), 2);
    assert_eq!(full.batch_results[1].status, BatchStatus::Failed);
    assert_eq!(full.issues_count, 1);
    assert_eq!(stored_issues.len(), full.issues_count as usize);
    assert_eq!(stored_issues[0].line_number, Some(42));
    assert!(full.finished_at.is_some());
}

#[tokio::test]
async fn restart_recovery_marks_processing_failed() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();

    let stuck = tasks.create(new_task("aaa")).await.unwrap();
    tasks.mark_processing(stuck.task_id).await.unwrap();
    let queued = tasks.create(new_task("bbb")).await.unwrap();

    let pending = tasks.recover_interrupted().await.unwrap();
    assert_eq!(pending, vec![queued.task_id]);

    let recovered = tasks.get(stuck.task_id).await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Failed);
    assert_eq!(recovered.error_message.as_deref(), Some("aborted by restart"));
}

#[tokio::test]
async fn cancelled_pending_task_is_not_picked_up() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();
    let task = tasks.create(new_task("ccc")).await.unwrap();

    tasks
        .finalize(
            task.task_id,
            TaskStatus::Cancelled,
            &[],
            SummaryFields::default(),
            None,
        )
        .await
        .unwrap();

    // mark_processing must refuse: the task is no longer pending.
    assert!(!tasks.mark_processing(task.task_id).await.unwrap());
}

#[tokio::test]
async fn marker_compare_and_advance_is_sequential() {
    let store = Store::open_in_memory().await.unwrap();
    let markers = store.revisions();
    let now = Utc::now();

    assert!(markers
        .get("r", "main", RevisionKind::Commit)
        .await
        .unwrap()
        .is_none());

    // First advance: no marker yet, expected_prev = None.
    assert!(markers
        .compare_and_advance("r", "main", RevisionKind::Commit, None, "v1", now)
        .await
        .unwrap());

    // Skipping v2 is rejected: expected_prev names v2 but marker is at v1.
    assert!(!markers
        .compare_and_advance("r", "main", RevisionKind::Commit, Some("v2"), "v3", now)
        .await
        .unwrap());
    let marker = markers
        .get("r", "main", RevisionKind::Commit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker.last_seen_id, "v1");

    // In-order advance succeeds.
    assert!(markers
        .compare_and_advance("r", "main", RevisionKind::Commit, Some("v1"), "v2", now)
        .await
        .unwrap());
}

#[tokio::test]
async fn task_listing_filters_and_sorts() {
    let store = Store::open_in_memory().await.unwrap();
    let tasks = store.tasks();
    for rev in ["r1", "r2", "r3"] {
        tasks.create(new_task(rev)).await.unwrap();
    }

    let all = tasks
        .query(TaskFilter {
            limit: 10,
            descending: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let filtered = tasks
        .query(TaskFilter {
            search: Some("r2".into()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].revision_ref, "r2");
}

#[tokio::test]
async fn settings_cache_tracks_version() {
    let store = Store::open_in_memory().await.unwrap();
    let settings = store.settings();

    let before = settings.version();
    assert_eq!(
        settings.get_or("enable_comment", "false").await.unwrap(),
        "true"
    );

    settings.set("enable_comment", "false").await.unwrap();
    assert!(settings.version() > before);
    assert!(!settings.get_bool("enable_comment", true).await.unwrap());

    // Secret values are masked in the metadata listing.
    settings.set("model_api_key", "sk-secret").await.unwrap();
    let meta = settings.list_with_meta().await.unwrap();
    let key_row = meta.iter().find(|m| m.key == "model_api_key").unwrap();
    assert_eq!(key_row.value, "***");
}
