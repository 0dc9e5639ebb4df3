//! End-to-end pipeline tests against a real local git repository and a stub
//! assistant binary. Skipped silently when `git` is not on PATH.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use git_workspace::WorkspaceManager;
use review_engine::{EngineConfig, ReviewEngine};
use review_store::models::{
    BatchStatus, CloneStatus, NewTask, Platform, RepoAuth, RepoConfig, ReviewStrategy,
    RevisionKind, TaskStatus, TriggerMode,
};
use review_store::Store;
use uuid::Uuid;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Creates an origin repository with two commits; returns (path, shas).
fn setup_origin(root: &Path) -> (PathBuf, String, String) {
    let origin = root.join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init"]);
    git(&origin, &["checkout", "-b", "main"]);
    git(&origin, &["config", "user.email", "test@example.com"]);
    git(&origin, &["config", "user.name", "Test"]);

    std::fs::write(origin.join("lib.rs"), "pub fn a() {}\n").unwrap();
    git(&origin, &["add", "-A"]);
    git(&origin, &["commit", "-m", "initial"]);
    let first = git(&origin, &["rev-parse", "HEAD"]);

    std::fs::write(origin.join("lib.rs"), "pub fn a() {}\npub fn b() {}\n").unwrap();
    std::fs::write(origin.join("extra.rs"), "pub fn c() {}\n").unwrap();
    git(&origin, &["add", "-A"]);
    git(&origin, &["commit", "-m", "add feature"]);
    let second = git(&origin, &["rev-parse", "HEAD"]);

    (origin, first, second)
}

fn stub_assistant(root: &Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = root.join("assistant-stub");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh\n{body}").unwrap();
    f.flush().unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn repo_config(origin: &Path) -> RepoConfig {
    RepoConfig {
        repo_id: "repo-under-test".into(),
        name: "fixture".into(),
        clone_url: origin.to_string_lossy().into_owned(),
        branch: "main".into(),
        platform: Platform::GitLab,
        auth: RepoAuth::None,
        trigger_mode: TriggerMode::Polling,
        polling_interval_minutes: 5,
        effective_from: None,
        poll_commits: true,
        poll_mrs: false,
        enable_comment: false,
        enabled: true,
        local_path: None,
        webhook_secret: None,
        api_base: None,
        clone_status: CloneStatus::Absent,
        last_check_time: None,
    }
}

async fn build_engine(root: &Path, assistant_bin: String) -> (Store, Arc<ReviewEngine>) {
    let store = Store::open_in_memory().await.unwrap();
    let workspace = Arc::new(WorkspaceManager::new(root.join("mirrors")));
    let config = EngineConfig {
        worker_count: 1,
        assistant_bin,
        batch_timeout: Duration::from_secs(60),
        termination_grace: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(5),
        ..EngineConfig::default()
    };
    let engine = ReviewEngine::new(store.clone(), workspace, config);
    engine.start().await.unwrap();
    (store, engine)
}

async fn wait_terminal(store: &Store, task_id: Uuid) -> review_store::models::ReviewTask {
    for _ in 0..300 {
        let task = store.tasks().get(task_id).await.unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("task did not reach a terminal state in time");
}

fn commit_task(repo: &RepoConfig, revision: &str) -> NewTask {
    NewTask {
        repo_id: repo.repo_id.clone(),
        project_name: repo.name.clone(),
        strategy: ReviewStrategy::Commit,
        revision_ref: revision.to_string(),
        base_ref: None,
        branch: repo.branch.clone(),
        author_name: Some("alice".into()),
        author_email: None,
        poll_kind: None,
        marker_prev: None,
    }
}

#[tokio::test]
async fn commit_review_runs_end_to_end_and_advances_marker() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    let assistant = stub_assistant(
        root.path(),
        "echo '🔴 [lib.rs:2] function added without tests'\n\
         echo '🔵 [extra.rs:1] consider documenting c'",
    );
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    let mut input = commit_task(&repo, &second);
    input.poll_kind = Some(RevisionKind::Commit);
    input.marker_prev = None;
    let task = engine.submit(input).await.unwrap();

    let done = wait_terminal(&store, task.task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.batch_total, 1);
    assert_eq!(done.batch_current, 1);
    assert_eq!(done.batch_results.len(), 1);
    assert_eq!(done.batch_results[0].status, BatchStatus::Success);
    assert_eq!(done.issues_count, 2);
    assert_eq!(done.critical_count, 1);
    assert_eq!(done.suggestion_count, 1);
    // 100 - 10 (critical) - 1 (suggestion)
    assert_eq!(done.quality_score, Some(89));
    assert!(done.files_reviewed.contains(&"lib.rs".to_string()));
    assert!(done.files_reviewed.contains(&"extra.rs".to_string()));
    assert!(done.processing_time_seconds.is_some());

    // Issues persisted in report order.
    let (_, issues) = store.tasks().get_full(task.task_id).await.unwrap();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].file_path.as_deref(), Some("lib.rs"));
    assert_eq!(issues[0].line_number, Some(2));

    // Post-finalize hook advanced the commit marker to the reviewed SHA.
    let marker = store
        .revisions()
        .get(&repo.repo_id, &repo.branch, RevisionKind::Commit)
        .await
        .unwrap()
        .expect("marker present");
    assert_eq!(marker.last_seen_id, second);

    engine.shutdown().await;
}

#[tokio::test]
async fn empty_change_set_completes_without_batches() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    let assistant = stub_assistant(root.path(), "echo 'should never run'\nexit 7");
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    let mut input = commit_task(&repo, &second);
    input.base_ref = Some(second.clone());
    let task = engine.submit(input).await.unwrap();

    let done = wait_terminal(&store, task.task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.batch_total, 0);
    assert_eq!(done.batch_current, 0);
    assert_eq!(done.issues_count, 0);
    assert_eq!(done.quality_score, Some(100));

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_batches_are_tolerated_when_one_succeeds() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    // Fails only for the batch containing extra.rs.
    let assistant = stub_assistant(
        root.path(),
        "case \"$*\" in *extra.rs*) echo 'model unreachable' >&2; exit 1;; esac\n\
         echo '🟡 [lib.rs:2] b is unused'",
    );
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    // One token per batch forces one file per batch.
    store
        .settings()
        .set("max_tokens_per_batch", "1")
        .await
        .unwrap();

    let task = engine.submit(commit_task(&repo, &second)).await.unwrap();
    let done = wait_terminal(&store, task.task_id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.batch_total, 2);
    assert_eq!(done.batch_current, 2);
    let failed: Vec<_> = done
        .batch_results
        .iter()
        .filter(|b| b.status == BatchStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].files.iter().any(|f| f == "extra.rs"));
    assert!(failed[0].error.is_some());
    assert_eq!(done.warning_count, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn all_batches_failing_fails_the_task() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    let assistant = stub_assistant(root.path(), "exit 2");
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    let task = engine.submit(commit_task(&repo, &second)).await.unwrap();
    let done = wait_terminal(&store, task.task_id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("all batches failed"));
    assert!(done
        .batch_results
        .iter()
        .all(|b| b.status == BatchStatus::Failed));

    engine.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_processing_task_terminates_the_batch() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    let assistant = stub_assistant(root.path(), "sleep 60");
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    let task = engine.submit(commit_task(&repo, &second)).await.unwrap();

    // Wait for the worker to reach processing, then cancel mid-batch.
    for _ in 0..100 {
        let status = store.tasks().status(task.task_id).await.unwrap();
        if status == TaskStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.cancel(task.task_id).await.unwrap();

    let done = wait_terminal(&store, task.task_id).await;
    assert_eq!(done.status, TaskStatus::Cancelled);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_pending_task_removes_it_before_execution() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    // Blocks the single worker so the second task stays queued.
    let assistant = stub_assistant(root.path(), "sleep 60");
    let (store, engine) = build_engine(root.path(), assistant).await;
    let repo = repo_config(&origin);
    store.repos().upsert(&repo).await.unwrap();

    let blocker = engine.submit(commit_task(&repo, &second)).await.unwrap();
    let mut queued_input = commit_task(&repo, &second);
    queued_input.strategy = ReviewStrategy::MergeRequest;
    queued_input.base_ref = Some("main".into());
    queued_input.branch = "main".into();
    let queued = engine.submit(queued_input).await.unwrap();

    engine.cancel(queued.task_id).await.unwrap();
    let done = wait_terminal(&store, queued.task_id).await;
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert_eq!(done.batch_total, 0);

    engine.cancel(blocker.task_id).await.unwrap();
    wait_terminal(&store, blocker.task_id).await;
    engine.shutdown().await;
}
