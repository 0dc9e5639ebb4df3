//! Working-copy manager tests against a real local repository.
//! Skipped silently when `git` is not on PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use git_workspace::WorkspaceManager;
use review_store::models::{
    CloneStatus, Platform, RepoAuth, RepoConfig, TriggerMode,
};

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
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn setup_origin(root: &Path) -> (PathBuf, String, String) {
    let origin = root.join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init"]);
    git(&origin, &["checkout", "-b", "main"]);
    git(&origin, &["config", "user.email", "test@example.com"]);
    git(&origin, &["config", "user.name", "Test"]);

    std::fs::write(origin.join("a.rs"), "fn a() {}\n").unwrap();
    git(&origin, &["add", "-A"]);
    git(&origin, &["commit", "-m", "one"]);
    let first = git(&origin, &["rev-parse", "HEAD"]);

    std::fs::write(origin.join("a.rs"), "fn a() {}\nfn a2() {}\n").unwrap();
    std::fs::write(origin.join("b.rs"), "fn b() {}\n").unwrap();
    git(&origin, &["add", "-A"]);
    git(&origin, &["commit", "-m", "two"]);
    let second = git(&origin, &["rev-parse", "HEAD"]);

    (origin, first, second)
}

fn repo(origin: &Path) -> RepoConfig {
    RepoConfig {
        repo_id: "ws-test".into(),
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

#[tokio::test]
async fn clone_checkout_diff_and_read() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, first, second) = setup_origin(root.path());
    let ws = WorkspaceManager::new(root.path().join("mirrors"));
    let repo = repo(&origin);

    // ensure_cloned is idempotent.
    let path1 = ws.ensure_cloned(&repo).await.unwrap();
    let path2 = ws.ensure_cloned(&repo).await.unwrap();
    assert_eq!(path1, path2);
    assert!(path1.join(".git").is_dir());

    // Checkout the older revision; working tree matches it.
    let checkout = ws.checkout(&repo, &first).await.unwrap();
    assert!(!checkout.join("b.rs").exists());

    // Changed files between the two commits, with numstat counts.
    let changed = ws
        .list_changed_files(&repo, Some(&first), &second)
        .await
        .unwrap();
    let paths: Vec<&str> = changed.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["a.rs", "b.rs"]);
    assert_eq!(changed[0].additions, 1);

    // Identical endpoints mean an empty change set.
    assert!(ws
        .list_changed_files(&repo, Some(&second), &second)
        .await
        .unwrap()
        .is_empty());

    // read_file serves blobs at any revision without moving the tree.
    let old = ws.read_file(&repo, &first, "a.rs").await.unwrap().unwrap();
    assert_eq!(String::from_utf8(old).unwrap(), "fn a() {}\n");
    assert!(ws.read_file(&repo, &first, "b.rs").await.unwrap().is_none());

    // Branch head resolution and commit timestamps.
    let head = ws.head_commit(&repo, "main").await.unwrap();
    assert_eq!(head, second);
    let ts1 = ws.commit_timestamp(&repo, &first).await.unwrap();
    let ts2 = ws.commit_timestamp(&repo, &second).await.unwrap();
    assert!(ts2 >= ts1);

    // A clean checkout reports no divergence.
    let checkout = ws.checkout(&repo, &second).await.unwrap();
    assert!(!ws.working_tree_dirty(&checkout).await.unwrap());
    std::fs::write(checkout.join("a.rs"), "tampered\n").unwrap();
    assert!(ws.working_tree_dirty(&checkout).await.unwrap());

    // Remote probe works against the local origin.
    ws.probe_remote(&repo).await.unwrap();
}

#[tokio::test]
async fn checkout_recovers_after_mirror_deletion() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = tempfile::TempDir::new().unwrap();
    let (origin, _first, second) = setup_origin(root.path());
    let ws = WorkspaceManager::new(root.path().join("mirrors"));
    let repo = repo(&origin);

    let path = ws.checkout(&repo, &second).await.unwrap();
    std::fs::remove_dir_all(&path).unwrap();

    // Deleting the mirror just forces a re-clone.
    let path = ws.checkout(&repo, &second).await.unwrap();
    assert!(path.join("b.rs").exists());
}
