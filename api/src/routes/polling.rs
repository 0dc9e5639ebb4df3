//! Polling control and repository management routes.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use review_store::models::{
    CloneStatus, NewTask, Platform, RepoAuth, RepoConfig, ReviewStrategy, TriggerMode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};

/// Repository view with credentials stripped; what the dashboard sees.
#[derive(Debug, Serialize)]
pub struct RepoView {
    pub repo_id: String,
    pub name: String,
    pub clone_url: String,
    pub branch: String,
    pub platform: &'static str,
    pub auth_type: &'static str,
    pub trigger_mode: &'static str,
    pub polling_interval_minutes: u32,
    pub effective_from: Option<DateTime<Utc>>,
    pub poll_commits: bool,
    pub poll_mrs: bool,
    pub enable_comment: bool,
    pub enabled: bool,
    pub local_path: Option<String>,
    pub has_webhook_secret: bool,
    pub api_base: Option<String>,
    pub clone_status: &'static str,
    pub last_check_time: Option<DateTime<Utc>>,
}

impl From<&RepoConfig> for RepoView {
    fn from(repo: &RepoConfig) -> Self {
        Self {
            repo_id: repo.repo_id.clone(),
            name: repo.name.clone(),
            clone_url: repo.clone_url.clone(),
            branch: repo.branch.clone(),
            platform: repo.platform.as_str(),
            auth_type: match repo.auth {
                RepoAuth::None => "none",
                RepoAuth::HttpBasic { .. } => "http_basic",
                RepoAuth::Token { .. } => "token",
            },
            trigger_mode: repo.trigger_mode.as_str(),
            polling_interval_minutes: repo.polling_interval_minutes,
            effective_from: repo.effective_from,
            poll_commits: repo.poll_commits,
            poll_mrs: repo.poll_mrs,
            enable_comment: repo.enable_comment,
            enabled: repo.enabled,
            local_path: repo.local_path.clone(),
            has_webhook_secret: repo
                .webhook_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty()),
            api_base: repo.api_base.clone(),
            clone_status: repo.clone_status.as_str(),
            last_check_time: repo.last_check_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RepoPayload {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub http_user: Option<String>,
    #[serde(default)]
    pub http_password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: String,
    #[serde(default = "default_interval")]
    pub polling_interval_minutes: u32,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub poll_commits: bool,
    #[serde(default)]
    pub poll_mrs: bool,
    #[serde(default = "default_true")]
    pub enable_comment: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_platform() -> String {
    "gitlab".to_string()
}
fn default_trigger_mode() -> String {
    "polling".to_string()
}
fn default_interval() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

impl RepoPayload {
    fn into_config(self, repo_id: String) -> Result<RepoConfig, AppError> {
        let platform = Platform::parse(&self.platform)
            .ok_or_else(|| AppError::BadRequest(format!("unknown platform: {}", self.platform)))?;
        let trigger_mode = TriggerMode::parse(&self.trigger_mode).ok_or_else(|| {
            AppError::BadRequest(format!("unknown trigger_mode: {}", self.trigger_mode))
        })?;
        if self.url.trim().is_empty() {
            return Err(AppError::BadRequest("clone url must not be empty".into()));
        }
        let auth = match self.auth_type.as_deref().unwrap_or("none") {
            "none" => RepoAuth::None,
            "http_basic" => RepoAuth::HttpBasic {
                user: self.http_user.unwrap_or_default(),
                password: self.http_password.unwrap_or_default(),
            },
            "token" => RepoAuth::Token {
                value: self.token.unwrap_or_default(),
            },
            other => {
                return Err(AppError::BadRequest(format!("unknown auth_type: {other}")));
            }
        };
        Ok(RepoConfig {
            repo_id,
            name: self.name,
            clone_url: self.url,
            branch: self.branch,
            platform,
            auth,
            trigger_mode,
            polling_interval_minutes: self.polling_interval_minutes.max(1),
            effective_from: self.effective_from,
            poll_commits: self.poll_commits,
            poll_mrs: self.poll_mrs,
            enable_comment: self.enable_comment,
            enabled: self.enabled,
            local_path: self.local_path.filter(|p| !p.is_empty()),
            webhook_secret: self.webhook_secret.filter(|s| !s.is_empty()),
            api_base: self.api_base.filter(|b| !b.is_empty()),
            clone_status: CloneStatus::Absent,
            last_check_time: None,
        })
    }
}

pub async fn polling_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.poller.status().await;
    Json(serde_json::to_value(status).unwrap_or_else(|_| json!({})))
}

pub async fn polling_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.poller.start();
    Json(json!({"status": "started"}))
}

pub async fn polling_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.poller.stop();
    Json(json!({"status": "stopped"}))
}

pub async fn list_repos(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let repos = state.store.repos().list().await?;
    let views: Vec<RepoView> = repos.iter().map(RepoView::from).collect();
    Ok(Json(json!({ "repos": views })))
}

pub async fn add_repo(
    State(state): State<AppState>,
    Json(payload): Json<RepoPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let repo_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let repo = payload.into_config(repo_id)?;
    state.store.repos().upsert(&repo).await?;
    info!(repo_id = %repo.repo_id, name = %repo.name, "repository added");
    Ok(Json(json!({"status": "added", "repo": RepoView::from(&repo)})))
}

pub async fn update_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(payload): Json<RepoPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let existing = state.store.repos().get(&repo_id).await?;
    let mut repo = payload.into_config(repo_id)?;
    // Clone bookkeeping survives edits.
    repo.clone_status = existing.clone_status;
    repo.last_check_time = existing.last_check_time;
    state.store.repos().upsert(&repo).await?;
    Ok(Json(json!({"status": "updated", "repo": RepoView::from(&repo)})))
}

pub async fn delete_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.store.repos().delete(&repo_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({"status": "deleted", "repo_id": repo_id})))
}

/// Connectivity probe (`git ls-remote`) for a saved repository.
pub async fn test_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let repo = state.store.repos().get(&repo_id).await?;
    match state.engine.workspace().probe_remote(&repo).await {
        Ok(()) => Ok(Json(json!({"success": true}))),
        Err(e) => Ok(Json(json!({"success": false, "message": e.to_string()}))),
    }
}

/// Starts a background clone of the repository mirror.
pub async fn clone_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let repo = state.store.repos().get(&repo_id).await?;
    let store = state.store.clone();
    let workspace = state.engine.workspace().clone();
    tokio::spawn(async move {
        let _guard = workspace.repo_lock(&repo.repo_id).lock_owned().await;
        let _ = store
            .repos()
            .set_clone_status(&repo.repo_id, CloneStatus::Cloning)
            .await;
        let status = match workspace.ensure_cloned(&repo).await {
            Ok(_) => CloneStatus::Cloned,
            Err(e) => {
                warn!(repo_id = %repo.repo_id, error = %e, "background clone failed");
                CloneStatus::Failed
            }
        };
        let _ = store.repos().set_clone_status(&repo.repo_id, status).await;
    });
    Ok(Json(json!({"status": "cloning", "repo_id": repo_id})))
}

#[derive(Debug, Deserialize, Default)]
pub struct TriggerPayload {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
}

/// Manually enqueues a review for the repository's branch head.
pub async fn trigger_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    payload: Option<Json<TriggerPayload>>,
) -> AppResult<Json<serde_json::Value>> {
    let repo = state.store.repos().get(&repo_id).await?;
    if !repo.enabled {
        return Err(AppError::BadRequest("repository is disabled".into()));
    }
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let strategy = match payload.strategy.as_deref() {
        None | Some("commit") => ReviewStrategy::Commit,
        Some("merge_request") => ReviewStrategy::MergeRequest,
        Some(other) => {
            return Err(AppError::BadRequest(format!("unknown strategy: {other}")));
        }
    };
    let branch = payload.branch.unwrap_or_else(|| repo.branch.clone());

    let input = match strategy {
        ReviewStrategy::Commit => {
            // Pin the branch head to a concrete SHA so the at-most-one rule
            // and the report refer to a stable revision. The mirror lock
            // keeps this from racing an active checkout.
            let head = {
                let workspace = state.engine.workspace();
                let _guard = workspace.repo_lock(&repo.repo_id).lock_owned().await;
                workspace
                    .head_commit(&repo, &branch)
                    .await
                    .map_err(|e| AppError::Internal(format!("cannot resolve branch head: {e}")))?
            };
            NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy,
                revision_ref: head,
                base_ref: None,
                branch,
                author_name: Some("manual trigger".into()),
                author_email: None,
                poll_kind: None,
                marker_prev: None,
            }
        }
        ReviewStrategy::MergeRequest => {
            let target = payload
                .target_branch
                .unwrap_or_else(|| default_branch());
            if target == branch {
                return Err(AppError::BadRequest(
                    "source and target branch must differ for a merge_request review".into(),
                ));
            }
            NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy,
                revision_ref: branch.clone(),
                base_ref: Some(target),
                branch,
                author_name: Some("manual trigger".into()),
                author_email: None,
                poll_kind: None,
                marker_prev: None,
            }
        }
    };

    let task = state.engine.submit(input).await?;
    Ok(Json(json!({
        "status": "triggered",
        "repo_id": repo_id,
        "strategy": strategy.as_str(),
        "task_id": task.task_id,
    })))
}
