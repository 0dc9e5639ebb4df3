//! Repository configuration store.
//!
//! Identity is managed by operators through the API; the engine consumes
//! these rows to decide what to poll, how to authenticate, and where the
//! mirror lives.

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::errors::{StoreError, StoreResult};
use crate::models::{CloneStatus, Platform, RepoAuth, RepoConfig, TriggerMode};
use crate::util::{bad_col, dt_to_ts, other_err, ts_to_dt};

const REPO_COLUMNS: &str = "repo_id, name, clone_url, branch, platform, auth, trigger_mode, \
     polling_interval_minutes, effective_from, poll_commits, poll_mrs, enable_comment, \
     enabled, local_path, webhook_secret, api_base, clone_status, last_check_time";

#[derive(Clone)]
pub struct RepoStore {
    conn: Connection,
}

impl RepoStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Inserts or fully replaces a repository configuration.
    pub async fn upsert(&self, repo: &RepoConfig) -> StoreResult<()> {
        let r = repo.clone();
        self.conn
            .call(move |db| {
                db.execute(
                    &format!(
                        "INSERT OR REPLACE INTO repos ({REPO_COLUMNS}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                    ),
                    rusqlite::params![
                        r.repo_id,
                        r.name,
                        r.clone_url,
                        r.branch,
                        r.platform.as_str(),
                        serde_json::to_string(&r.auth).map_err(other_err)?,
                        r.trigger_mode.as_str(),
                        r.polling_interval_minutes as i64,
                        r.effective_from.as_ref().map(dt_to_ts),
                        r.poll_commits as i64,
                        r.poll_mrs as i64,
                        r.enable_comment as i64,
                        r.enabled as i64,
                        r.local_path,
                        r.webhook_secret,
                        r.api_base,
                        r.clone_status.as_str(),
                        r.last_check_time.as_ref().map(dt_to_ts),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, repo_id: &str) -> StoreResult<RepoConfig> {
        let id = repo_id.to_string();
        let wanted = repo_id.to_string();
        self.conn
            .call(move |db| {
                let repo = db.query_row(
                    &format!("SELECT {REPO_COLUMNS} FROM repos WHERE repo_id = ?1"),
                    [&id],
                    map_repo_row,
                )?;
                Ok::<_, tokio_rusqlite::Error>(repo)
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows) => {
                    StoreError::RepoNotFound(wanted)
                }
                other => StoreError::Db(other),
            })
    }

    pub async fn list(&self) -> StoreResult<Vec<RepoConfig>> {
        self.conn
            .call(|db| {
                let mut stmt =
                    db.prepare(&format!("SELECT {REPO_COLUMNS} FROM repos ORDER BY name"))?;
                let rows = stmt.query_map([], map_repo_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }

    /// Repositories the poller should visit: enabled and in a polling mode.
    pub async fn list_pollable(&self) -> StoreResult<Vec<RepoConfig>> {
        let repos = self.list().await?;
        Ok(repos
            .into_iter()
            .filter(|r| r.enabled && r.trigger_mode.polls())
            .collect())
    }

    /// Matches a webhook event's repository URL against configured repos.
    /// Comparison is case-insensitive with the `.git` suffix normalized away.
    pub async fn find_by_clone_url(&self, url: &str) -> StoreResult<Option<RepoConfig>> {
        let wanted = normalize_clone_url(url);
        let repos = self.list().await?;
        Ok(repos
            .into_iter()
            .find(|r| normalize_clone_url(&r.clone_url) == wanted))
    }

    pub async fn set_clone_status(&self, repo_id: &str, status: CloneStatus) -> StoreResult<()> {
        let id = repo_id.to_string();
        self.conn
            .call(move |db| {
                db.execute(
                    "UPDATE repos SET clone_status = ?2 WHERE repo_id = ?1",
                    rusqlite::params![id, status.as_str()],
                )?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Stamped on every poll attempt, success or not.
    pub async fn set_last_check(&self, repo_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let id = repo_id.to_string();
        let ts = dt_to_ts(&at);
        self.conn
            .call(move |db| {
                db.execute(
                    "UPDATE repos SET last_check_time = ?2 WHERE repo_id = ?1",
                    rusqlite::params![id, ts],
                )?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Removes the repo row. Markers are kept: the engine never deletes them,
    /// and re-adding the same repo id resumes from the old baseline.
    pub async fn delete(&self, repo_id: &str) -> StoreResult<bool> {
        let id = repo_id.to_string();
        let n = self
            .conn
            .call(move |db| {
                let n = db.execute("DELETE FROM repos WHERE repo_id = ?1", [&id])?;
                Ok::<_, tokio_rusqlite::Error>(n)
            })
            .await?;
        Ok(n == 1)
    }
}

/// Lowercase, trailing-slash and `.git`-suffix insensitive form for matching.
pub fn normalize_clone_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

fn map_repo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoConfig> {
    let platform: String = row.get(4)?;
    let auth: String = row.get(5)?;
    let trigger_mode: String = row.get(6)?;
    let clone_status: String = row.get(16)?;
    Ok(RepoConfig {
        repo_id: row.get(0)?,
        name: row.get(1)?,
        clone_url: row.get(2)?,
        branch: row.get(3)?,
        platform: Platform::parse(&platform)
            .ok_or_else(|| bad_col(4, format!("invalid platform: {platform}")))?,
        auth: serde_json::from_str::<RepoAuth>(&auth)
            .map_err(|e| bad_col(5, format!("invalid auth: {e}")))?,
        trigger_mode: TriggerMode::parse(&trigger_mode)
            .ok_or_else(|| bad_col(6, format!("invalid trigger_mode: {trigger_mode}")))?,
        polling_interval_minutes: row.get::<_, i64>(7)?.max(1) as u32,
        effective_from: row.get::<_, Option<i64>>(8)?.map(ts_to_dt),
        poll_commits: row.get::<_, i64>(9)? != 0,
        poll_mrs: row.get::<_, i64>(10)? != 0,
        enable_comment: row.get::<_, i64>(11)? != 0,
        enabled: row.get::<_, i64>(12)? != 0,
        local_path: row.get(13)?,
        webhook_secret: row.get(14)?,
        api_base: row.get(15)?,
        clone_status: CloneStatus::parse(&clone_status)
            .ok_or_else(|| bad_col(16, format!("invalid clone_status: {clone_status}")))?,
        last_check_time: row.get::<_, Option<i64>>(17)?.map(ts_to_dt),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_normalization() {
        assert_eq!(
            normalize_clone_url("https://Git.Example.com/Team/App.git"),
            "https://git.example.com/team/app"
        );
        assert_eq!(
            normalize_clone_url("https://git.example.com/team/app/"),
            "https://git.example.com/team/app"
        );
        assert_eq!(
            normalize_clone_url("git@host:team/app.git"),
            "git@host:team/app"
        );
    }
}
