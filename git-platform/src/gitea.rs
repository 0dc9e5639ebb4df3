//! Gitea provider (REST v1).
//!
//! Endpoints used:
//! - GET  /repos/{owner}/{repo}/commits?sha=…
//! - GET  /repos/{owner}/{repo}/pulls?state=open
//! - POST /repos/{owner}/{repo}/issues/{index}/comments
//!
//! Gitea has no commit-comment endpoint; that call degrades to a logged no-op.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::errors::PlatformResult;
use crate::types::{ApiAuth, CommitInfo, MergeRequestInfo};

#[derive(Debug, Clone)]
pub struct GiteaClient {
    http: Client,
    base_api: String,
    auth: ApiAuth,
}

impl GiteaClient {
    pub fn new(http: Client, base_api: String, auth: ApiAuth) -> Self {
        Self {
            http,
            base_api,
            auth,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth.token {
            req.header("Authorization", format!("token {token}"))
        } else if let Some((user, pass)) = &self.auth.basic {
            req.basic_auth(user, Some(pass))
        } else {
            req
        }
    }

    pub async fn list_commits(
        &self,
        project_path: &str,
        branch: &str,
        limit: u32,
    ) -> PlatformResult<Vec<CommitInfo>> {
        let url = format!("{}/repos/{}/commits", self.base_api, project_path);
        let raw: Vec<GiteaCommit> = self
            .authed(self.http.get(url))
            .query(&[("sha", branch), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| CommitInfo {
                id: c.sha,
                message: c.commit.message,
                author_name: c.commit.author.as_ref().map(|a| a.name.clone()),
                author_email: c.commit.author.as_ref().and_then(|a| a.email.clone()),
                committed_at: c.commit.author.and_then(|a| a.date),
            })
            .collect())
    }

    pub async fn list_open_mrs(
        &self,
        project_path: &str,
        limit: u32,
    ) -> PlatformResult<Vec<MergeRequestInfo>> {
        let url = format!("{}/repos/{}/pulls", self.base_api, project_path);
        let raw: Vec<GiteaPull> = self
            .authed(self.http.get(url))
            .query(&[("state", "open"), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(raw
            .into_iter()
            .map(|pr| MergeRequestInfo {
                iid: pr.number,
                title: pr.title,
                source_branch: pr.head.r#ref,
                target_branch: pr.base.r#ref,
                author_name: pr.user.map(|u| u.display_name()),
                updated_at: pr.updated_at,
            })
            .collect())
    }

    pub async fn post_mr_comment(
        &self,
        project_path: &str,
        iid: u64,
        body: &str,
    ) -> PlatformResult<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_api, project_path, iid
        );
        self.authed(self.http.post(url))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn post_commit_comment(
        &self,
        project_path: &str,
        sha: &str,
        _body: &str,
    ) -> PlatformResult<()> {
        warn!(project_path, sha, "gitea does not support commit comments; skipping");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GiteaCommit {
    sha: String,
    commit: GiteaCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GiteaCommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<GiteaAuthor>,
}

#[derive(Debug, Deserialize)]
struct GiteaAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GiteaPull {
    number: u64,
    #[serde(default)]
    title: String,
    head: GiteaRef,
    base: GiteaRef,
    #[serde(default)]
    user: Option<GiteaUser>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GiteaRef {
    r#ref: String,
}

#[derive(Debug, Deserialize)]
struct GiteaUser {
    #[serde(default)]
    login: String,
    #[serde(default)]
    full_name: Option<String>,
}

impl GiteaUser {
    fn display_name(self) -> String {
        match self.full_name {
            Some(name) if !name.is_empty() => name,
            _ => self.login,
        }
    }
}
