//! Platform facade without async-trait or dynamic trait objects.
//!
//! A single `PlatformClient` enum dispatches to concrete per-platform
//! clients, all sharing one `reqwest::Client`. Mirrors the inbound side too:
//! webhook decoding and signature checks live in [`webhook`].

pub mod errors;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod types;
pub mod webhook;

use review_store::models::Platform;

use crate::errors::PlatformResult;
pub use crate::errors::PlatformError;
pub use crate::types::{
    extract_project_path, ApiAuth, CommitInfo, MergeRequestInfo, PlatformConfig, PlatformEvent,
};

/// Concrete platform client (enum-dispatch).
#[derive(Debug, Clone)]
pub enum PlatformClient {
    GitLab(gitlab::GitLabClient),
    Gitea(gitea::GiteaClient),
    GitHub(github::GitHubClient),
}

impl PlatformClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: PlatformConfig) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("review-relay/0.3")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(match cfg.kind {
            Platform::GitLab => {
                Self::GitLab(gitlab::GitLabClient::new(client, cfg.base_api, cfg.auth))
            }
            Platform::Gitea => Self::Gitea(gitea::GiteaClient::new(client, cfg.base_api, cfg.auth)),
            Platform::GitHub => {
                Self::GitHub(github::GitHubClient::new(client, cfg.base_api, cfg.auth))
            }
        })
    }

    /// New commits on `branch`, newest first, as the platform reports them.
    pub async fn list_commits(
        &self,
        project_path: &str,
        branch: &str,
        limit: u32,
    ) -> PlatformResult<Vec<CommitInfo>> {
        match self {
            Self::GitLab(c) => c.list_commits(project_path, branch, limit).await,
            Self::Gitea(c) => c.list_commits(project_path, branch, limit).await,
            Self::GitHub(c) => c.list_commits(project_path, branch, limit).await,
        }
    }

    /// Open merge/pull requests for the repository.
    pub async fn list_open_mrs(
        &self,
        project_path: &str,
        limit: u32,
    ) -> PlatformResult<Vec<MergeRequestInfo>> {
        match self {
            Self::GitLab(c) => c.list_open_mrs(project_path, limit).await,
            Self::Gitea(c) => c.list_open_mrs(project_path, limit).await,
            Self::GitHub(c) => c.list_open_mrs(project_path, limit).await,
        }
    }

    /// Posts the review report as an MR/PR note.
    pub async fn post_mr_comment(
        &self,
        project_path: &str,
        iid: u64,
        body: &str,
    ) -> PlatformResult<()> {
        match self {
            Self::GitLab(c) => c.post_mr_comment(project_path, iid, body).await,
            Self::Gitea(c) => c.post_mr_comment(project_path, iid, body).await,
            Self::GitHub(c) => c.post_mr_comment(project_path, iid, body).await,
        }
    }

    /// Posts the review report as a commit comment (no-op on Gitea).
    pub async fn post_commit_comment(
        &self,
        project_path: &str,
        sha: &str,
        body: &str,
    ) -> PlatformResult<()> {
        match self {
            Self::GitLab(c) => c.post_commit_comment(project_path, sha, body).await,
            Self::Gitea(c) => c.post_commit_comment(project_path, sha, body).await,
            Self::GitHub(c) => c.post_commit_comment(project_path, sha, body).await,
        }
    }
}
