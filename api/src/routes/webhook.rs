//! Webhook ingestion.
//!
//! Well-formed events always get a 200 with `queued`, `duplicate` or
//! `ignored` plus a reason, so platforms do not retry-storm us. Only a bad
//! signature (401), an unknown platform or an unparseable body (400) are
//! errors.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use git_platform::webhook::{decode_event, event_header_name, signature_header_name, verify_signature};
use git_platform::PlatformEvent;
use review_engine::EngineError;
use review_store::models::{NewTask, Platform, RepoConfig, ReviewStrategy};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

impl WebhookResponse {
    fn queued(task_id: Uuid) -> Self {
        Self {
            status: "queued",
            reason: None,
            task_id: Some(task_id),
        }
    }

    fn duplicate() -> Self {
        Self {
            status: "duplicate",
            reason: None,
            task_id: None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: "ignored",
            reason: Some(reason.into()),
            task_id: None,
        }
    }
}

/// MR actions that warrant a (re-)review.
const REVIEWABLE_MR_ACTIONS: &[&str] = &[
    "open",
    "opened",
    "reopen",
    "reopened",
    "update",
    "synchronize",
    "synchronized",
];

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResponse>> {
    let platform = Platform::parse(&platform)
        .ok_or_else(|| AppError::BadRequest(format!("unknown platform: {platform}")))?;

    let Some(event_kind) = header_str(&headers, event_header_name(platform)) else {
        debug!(platform = platform.as_str(), "webhook without event header");
        return Ok(Json(WebhookResponse::ignored("missing event header")));
    };

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("unparseable body: {e}")))?;

    let event = decode_event(platform, &event_kind, &payload);
    info!(platform = platform.as_str(), event = %event_kind, "webhook received");

    let clone_urls = match &event {
        PlatformEvent::Push { clone_urls, .. } => clone_urls.clone(),
        PlatformEvent::MergeRequest { clone_urls, .. } => clone_urls.clone(),
        PlatformEvent::Unknown { kind } => {
            debug!(kind = %kind, "unknown webhook event kind");
            return Ok(Json(WebhookResponse::ignored(format!(
                "unsupported event: {kind}"
            ))));
        }
    };

    let Some(repo) = find_repo(&state, &clone_urls).await? else {
        return Ok(Json(WebhookResponse::ignored("repository not configured")));
    };
    if !repo.enabled {
        return Ok(Json(WebhookResponse::ignored("repository disabled")));
    }
    if !repo.trigger_mode.accepts_webhooks() {
        return Ok(Json(WebhookResponse::ignored("webhooks disabled for repository")));
    }
    if repo.platform != platform {
        return Ok(Json(WebhookResponse::ignored("platform mismatch")));
    }

    // Signature check only applies when the repo has a secret configured.
    if let Some(secret) = repo.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = header_str(&headers, signature_header_name(platform));
        if !verify_signature(platform, secret, signature.as_deref(), &body) {
            warn!(repo_id = %repo.repo_id, "webhook signature mismatch");
            return Err(AppError::Unauthorized);
        }
    }

    let input = match event {
        PlatformEvent::Push {
            branch,
            head_commit,
            commits_count,
            author_name,
            author_email,
            committed_at,
            ..
        } => {
            if commits_count == 0 || head_commit.is_empty() {
                return Ok(Json(WebhookResponse::ignored("no commits in push")));
            }
            if branch != repo.branch {
                return Ok(Json(WebhookResponse::ignored("branch not configured")));
            }
            if let (Some(effective_from), Some(at)) = (repo.effective_from, committed_at) {
                if at < effective_from {
                    return Ok(Json(WebhookResponse::ignored("before effective_from")));
                }
            }
            NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy: ReviewStrategy::Commit,
                revision_ref: head_commit,
                base_ref: None,
                branch,
                author_name,
                author_email,
                poll_kind: None,
                marker_prev: None,
            }
        }
        PlatformEvent::MergeRequest {
            iid,
            action,
            source_branch,
            target_branch,
            author_name,
            updated_at,
            ..
        } => {
            if iid == 0 {
                return Ok(Json(WebhookResponse::ignored("missing MR iid")));
            }
            if !REVIEWABLE_MR_ACTIONS.contains(&action.as_str()) {
                return Ok(Json(WebhookResponse::ignored(format!(
                    "action not reviewable: {action}"
                ))));
            }
            if target_branch != repo.branch {
                return Ok(Json(WebhookResponse::ignored("target branch not configured")));
            }
            if let (Some(effective_from), Some(at)) = (repo.effective_from, updated_at) {
                if at < effective_from {
                    return Ok(Json(WebhookResponse::ignored("before effective_from")));
                }
            }
            NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy: ReviewStrategy::MergeRequest,
                revision_ref: iid.to_string(),
                base_ref: Some(target_branch),
                branch: source_branch,
                author_name,
                author_email: None,
                poll_kind: None,
                marker_prev: None,
            }
        }
        PlatformEvent::Unknown { .. } => unreachable!("handled above"),
    };

    match state.engine.submit(input).await {
        Ok(task) => {
            info!(task_id = %task.task_id, repo_id = %repo.repo_id, "webhook task queued");
            Ok(Json(WebhookResponse::queued(task.task_id)))
        }
        Err(EngineError::Duplicate) => Ok(Json(WebhookResponse::duplicate())),
        Err(e) => Err(e.into()),
    }
}

async fn find_repo(state: &AppState, clone_urls: &[String]) -> AppResult<Option<RepoConfig>> {
    for url in clone_urls {
        if let Some(repo) = state.store.repos().find_by_clone_url(url).await? {
            return Ok(Some(repo));
        }
    }
    Ok(None)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
