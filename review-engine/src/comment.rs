//! Best-effort posting of finished reviews back to the platform.
//!
//! Comment delivery never affects task state: every failure path here is a
//! warn-level log and nothing else.

use git_platform::{extract_project_path, ApiAuth, PlatformClient, PlatformConfig};
use review_store::models::{RepoAuth, RepoConfig, ReviewStrategy, ReviewTask};
use review_store::settings::SettingsStore;
use tracing::{info, warn};

/// Wraps the raw report with a small header describing the review.
pub fn format_review_comment(task: &ReviewTask, report: &str) -> String {
    let mut out = String::from("## 🤖 Automated Code Review\n\n");
    match task.strategy {
        ReviewStrategy::Commit => {
            out.push_str("**Review type**: commit\n");
            out.push_str(&format!("**Commit**: `{}`\n\n", task.revision_ref));
        }
        ReviewStrategy::MergeRequest => {
            out.push_str("**Review type**: merge request\n");
            if let Some(target) = &task.base_ref {
                out.push_str(&format!("**Target branch**: `{target}`\n\n"));
            }
        }
    }
    out.push_str("---\n\n");
    out.push_str(report);
    out
}

/// Posts the comment if the repository's platform is reachable. Logged-only
/// on failure.
pub async fn post_review_comment(
    repo: &RepoConfig,
    settings: &SettingsStore,
    task: &ReviewTask,
    body: &str,
) {
    let api_base = match &repo.api_base {
        Some(base) if !base.is_empty() => base.clone(),
        _ => match settings.get_or("git_api_base", "").await {
            Ok(base) if !base.is_empty() => base,
            _ => {
                warn!(repo_id = %repo.repo_id, "no platform API base configured; comment skipped");
                return;
            }
        },
    };
    let Some(project_path) = extract_project_path(&repo.clone_url) else {
        warn!(repo_id = %repo.repo_id, "cannot derive project path from clone url; comment skipped");
        return;
    };

    let auth = match &repo.auth {
        RepoAuth::Token { value } => ApiAuth {
            token: Some(value.clone()),
            basic: None,
        },
        RepoAuth::HttpBasic { user, password } => ApiAuth {
            token: None,
            basic: Some((user.clone(), password.clone())),
        },
        RepoAuth::None => ApiAuth::default(),
    };

    let client = match PlatformClient::from_config(PlatformConfig {
        kind: repo.platform,
        base_api: api_base,
        auth,
    }) {
        Ok(client) => client,
        Err(e) => {
            warn!(repo_id = %repo.repo_id, error = %e, "platform client build failed; comment skipped");
            return;
        }
    };

    let result = match task.strategy {
        ReviewStrategy::MergeRequest => match task.revision_ref.parse::<u64>() {
            Ok(iid) => client.post_mr_comment(&project_path, iid, body).await,
            Err(_) => {
                warn!(revision = %task.revision_ref, "MR revision is not a numeric iid; comment skipped");
                return;
            }
        },
        ReviewStrategy::Commit => {
            client
                .post_commit_comment(&project_path, &task.revision_ref, body)
                .await
        }
    };

    match result {
        Ok(()) => info!(task_id = %task.task_id, "review comment posted"),
        Err(e) => warn!(task_id = %task.task_id, error = %e, "review comment failed"),
    }
}
