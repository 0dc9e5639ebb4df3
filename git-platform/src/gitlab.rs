//! GitLab provider (REST v4).
//!
//! Endpoints used:
//! - GET  /projects/:id/repository/commits?ref_name=…
//! - GET  /projects/:id/merge_requests?state=opened
//! - POST /projects/:id/merge_requests/:iid/notes
//! - POST /projects/:id/repository/commits/:sha/comments

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::errors::PlatformResult;
use crate::types::{ApiAuth, CommitInfo, MergeRequestInfo};

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String,
    auth: ApiAuth,
}

impl GitLabClient {
    pub fn new(http: Client, base_api: String, auth: ApiAuth) -> Self {
        Self {
            http,
            base_api,
            auth,
        }
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if let Some(token) = &self.auth.token {
            req = req.header("PRIVATE-TOKEN", token);
        } else if let Some((user, pass)) = &self.auth.basic {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.http.post(url);
        if let Some(token) = &self.auth.token {
            req = req.header("PRIVATE-TOKEN", token);
        } else if let Some((user, pass)) = &self.auth.basic {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    pub async fn list_commits(
        &self,
        project_path: &str,
        branch: &str,
        limit: u32,
    ) -> PlatformResult<Vec<CommitInfo>> {
        let url = format!(
            "{}/projects/{}/repository/commits",
            self.base_api,
            urlencoding::encode(project_path)
        );
        let raw: Vec<GitLabCommit> = self
            .get(url)
            .query(&[("ref_name", branch), ("per_page", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| CommitInfo {
                id: c.id,
                message: c.message,
                author_name: c.author_name,
                author_email: c.author_email,
                committed_at: c.created_at,
            })
            .collect())
    }

    pub async fn list_open_mrs(
        &self,
        project_path: &str,
        limit: u32,
    ) -> PlatformResult<Vec<MergeRequestInfo>> {
        let url = format!(
            "{}/projects/{}/merge_requests",
            self.base_api,
            urlencoding::encode(project_path)
        );
        let raw: Vec<GitLabMr> = self
            .get(url)
            .query(&[("state", "opened"), ("per_page", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(raw
            .into_iter()
            .map(|mr| MergeRequestInfo {
                iid: mr.iid,
                title: mr.title,
                source_branch: mr.source_branch,
                target_branch: mr.target_branch,
                author_name: mr.author.map(|a| a.name),
                updated_at: mr.updated_at,
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
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_api,
            urlencoding::encode(project_path),
            iid
        );
        self.post(url)
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
            "{}/projects/{}/repository/commits/{}/comments",
            self.base_api,
            urlencoding::encode(project_path),
            sha
        );
        self.post(url)
            .json(&serde_json::json!({ "note": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    author_email: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitLabMr {
    iid: u64,
    #[serde(default)]
    title: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    author: Option<GitLabUser>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    name: String,
}
