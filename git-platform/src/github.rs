//! GitHub / GitHub Enterprise provider (REST v3).
//!
//! Endpoints used:
//! - GET  /repos/{owner}/{repo}/commits?sha=…
//! - GET  /repos/{owner}/{repo}/pulls?state=open
//! - POST /repos/{owner}/{repo}/issues/{number}/comments
//! - POST /repos/{owner}/{repo}/commits/{sha}/comments

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::errors::PlatformResult;
use crate::types::{ApiAuth, CommitInfo, MergeRequestInfo};

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    base_api: String,
    auth: ApiAuth,
}

impl GitHubClient {
    pub fn new(http: Client, base_api: String, auth: ApiAuth) -> Self {
        Self {
            http,
            base_api,
            auth,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("Accept", "application/vnd.github.v3+json");
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
        let raw: Vec<GitHubCommit> = self
            .authed(self.http.get(url))
            .query(&[("sha", branch), ("per_page", &limit.to_string())])
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
                author_name: c.commit.author.as_ref().and_then(|a| a.name.clone()),
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
        let raw: Vec<GitHubPull> = self
            .authed(self.http.get(url))
            .query(&[("state", "open"), ("per_page", &limit.to_string())])
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
                author_name: pr.user.map(|u| u.login),
                updated_at: pr.updated_at,
            })
            .collect())
    }

    pub async fn post_mr_comment(
        &self,
        project_path: &str,
        number: u64,
        body: &str,
    ) -> PlatformResult<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_api, project_path, number
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
        body: &str,
    ) -> PlatformResult<()> {
        let url = format!(
            "{}/repos/{}/commits/{}/comments",
            self.base_api, project_path, sha
        );
        self.authed(self.http.post(url))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
    commit: GitHubCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<GitHubCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitHubPull {
    number: u64,
    #[serde(default)]
    title: String,
    head: GitHubRef,
    base: GitHubRef,
    #[serde(default)]
    user: Option<GitHubUser>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    r#ref: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}
