//! Webhook ingestion tests driven through the router.
//!
//! Workers are deliberately not started: submitted tasks stay `pending`, so
//! the at-most-one rule is observable without racing task execution.

use std::sync::Arc;

use api::{AppConfig, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use git_workspace::WorkspaceManager;
use hmac::{Hmac, Mac};
use review_engine::{EngineConfig, Poller, ReviewEngine};
use review_store::models::{
    CloneStatus, Platform, RepoAuth, RepoConfig, TaskFilter, TriggerMode,
};
use review_store::Store;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::util::ServiceExt;

async fn test_state(repo: Option<RepoConfig>) -> (AppState, Store) {
    let store = Store::open_in_memory().await.unwrap();
    if let Some(repo) = &repo {
        store.repos().upsert(repo).await.unwrap();
    }
    let workspace = Arc::new(WorkspaceManager::new(std::env::temp_dir().join("rr-test")));
    let engine = ReviewEngine::new(store.clone(), workspace, EngineConfig::default());
    let poller = Poller::new(engine.clone());
    let config = Arc::new(AppConfig::from_env().unwrap());
    (
        AppState::new(config, store.clone(), engine, poller),
        store,
    )
}

fn gitlab_repo() -> RepoConfig {
    RepoConfig {
        repo_id: "r1".into(),
        name: "demo".into(),
        clone_url: "https://git.example.com/team/app.git".into(),
        branch: "main".into(),
        platform: Platform::GitLab,
        auth: RepoAuth::None,
        trigger_mode: TriggerMode::Both,
        polling_interval_minutes: 5,
        effective_from: None,
        poll_commits: true,
        poll_mrs: true,
        enable_comment: false,
        enabled: true,
        local_path: None,
        webhook_secret: None,
        api_base: None,
        clone_status: CloneStatus::Absent,
        last_check_time: None,
    }
}

fn push_payload() -> Value {
    json!({
        "ref": "refs/heads/main",
        "total_commits_count": 1,
        "project": {"git_http_url": "https://git.example.com/team/app.git"},
        "commits": [
            {"id": "abc123", "author": {"name": "alice", "email": "a@x"},
             "timestamp": "2025-06-01T12:00:00+00:00"}
        ]
    })
}

async fn post_webhook(
    state: &AppState,
    platform: &str,
    event: &str,
    body: &Value,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let app = api::router(state.clone());
    let mut request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{platform}"))
        .header("content-type", "application/json")
        .header(
            match platform {
                "gitlab" => "X-Gitlab-Event",
                "gitea" => "X-Gitea-Event",
                _ => "X-GitHub-Event",
            },
            event,
        );
    if let Some(token) = token {
        request = request.header("X-Gitlab-Token", token);
    }
    let response = app
        .oneshot(
            request
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn pending_count(store: &Store) -> usize {
    store
        .tasks()
        .query(TaskFilter {
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn unknown_platform_is_rejected() {
    let (state, _store) = test_state(None).await;
    let (status, _) = post_webhook(&state, "bitbucket", "push", &push_payload(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (state, _store) = test_state(Some(gitlab_repo())).await;
    let app = api::router(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/gitlab")
                .header("X-Gitlab-Event", "Push Hook")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn push_event_queues_exactly_one_task() {
    let (state, store) = test_state(Some(gitlab_repo())).await;

    let (status, body) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(pending_count(&store).await, 1);

    // Replaying the identical event must not create a second task.
    let (status, body) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(pending_count(&store).await, 1);
}

#[tokio::test]
async fn unconfigured_repository_is_ignored() {
    let (state, store) = test_state(None).await;
    let (status, body) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(pending_count(&store).await, 0);
}

#[tokio::test]
async fn other_branches_are_ignored() {
    let (state, store) = test_state(Some(gitlab_repo())).await;
    let mut payload = push_payload();
    payload["ref"] = json!("refs/heads/experiment");
    let (status, body) = post_webhook(&state, "gitlab", "Push Hook", &payload, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(pending_count(&store).await, 0);
}

#[tokio::test]
async fn commits_before_effective_from_are_ignored() {
    let mut repo = gitlab_repo();
    repo.effective_from = Some("2025-07-01T00:00:00Z".parse().unwrap());
    let (state, store) = test_state(Some(repo)).await;
    // Payload commit is dated 2025-06-01, before the cutoff.
    let (status, body) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(pending_count(&store).await, 0);
}

#[tokio::test]
async fn gitlab_secret_is_enforced() {
    let mut repo = gitlab_repo();
    repo.webhook_secret = Some("hunter2".into());
    let (state, store) = test_state(Some(repo)).await;

    let (status, _) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(pending_count(&store).await, 0);

    let (status, body) =
        post_webhook(&state, "gitlab", "Push Hook", &push_payload(), Some("hunter2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn github_hmac_signature_is_enforced() {
    let mut repo = gitlab_repo();
    repo.platform = Platform::GitHub;
    repo.clone_url = "https://github.example.com/team/app.git".into();
    repo.webhook_secret = Some("hunter2".into());
    let (state, store) = test_state(Some(repo)).await;

    let payload = json!({
        "ref": "refs/heads/main",
        "repository": {"clone_url": "https://github.example.com/team/app.git"},
        "pusher": {"name": "bob"},
        "commits": [{"id": "def456", "author": {"name": "bob", "email": "b@x"},
                     "timestamp": "2025-06-01T12:00:00Z"}]
    });
    let body_bytes = serde_json::to_vec(&payload).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"hunter2").unwrap();
    mac.update(&body_bytes);
    let hex: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    let app = api::router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", format!("sha256={hex}"))
                .body(Body::from(body_bytes))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(pending_count(&store).await, 1);

    // A tampered body must fail the signature check.
    let app = api::router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", format!("sha256={hex}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({"tampered": true})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mr_event_for_configured_target_is_queued() {
    let (state, store) = test_state(Some(gitlab_repo())).await;
    let payload = json!({
        "project": {"git_http_url": "https://git.example.com/team/app.git"},
        "user": {"name": "alice"},
        "object_attributes": {
            "iid": 3, "state": "opened", "action": "open",
            "source_branch": "feature", "target_branch": "main"
        }
    });
    let (status, body) =
        post_webhook(&state, "gitlab", "Merge Request Hook", &payload, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");

    let tasks = store
        .tasks()
        .query(TaskFilter {
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].revision_ref, "3");
    assert_eq!(tasks[0].branch, "feature");
    assert_eq!(tasks[0].base_ref.as_deref(), Some("main"));
}

#[tokio::test]
async fn closed_mr_actions_are_ignored() {
    let (state, store) = test_state(Some(gitlab_repo())).await;
    let payload = json!({
        "project": {"git_http_url": "https://git.example.com/team/app.git"},
        "user": {"name": "alice"},
        "object_attributes": {
            "iid": 3, "state": "closed", "action": "close",
            "source_branch": "feature", "target_branch": "main"
        }
    });
    let (status, body) =
        post_webhook(&state, "gitlab", "Merge Request Hook", &payload, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(pending_count(&store).await, 0);
}
