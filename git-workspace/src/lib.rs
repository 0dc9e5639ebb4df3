//! Working-copy manager (one local mirror per repository).
//!
//! All VCS work goes through the host `git` binary. Mirrors live under
//! `<base>/<repo_id>` (or a per-repo override) and are safe to delete: the
//! next `ensure_cloned` re-creates them. Checkouts are serialized per repo by
//! an owned mutex the scheduler holds across the whole review pipeline, so at
//! most one checkout and one assistant run touch a mirror at a time.
//!
//! Credentials are spliced into the URL handed to the `git` child and are
//! scrubbed from every error and log line; they never enter the environment
//! of any other subprocess.

pub mod auth;
pub mod errors;
mod git;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use review_store::models::RepoConfig;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::auth::{authenticated_url, redact_url};
use crate::errors::{GitError, GitResult};
use crate::git::{run_git, run_git_bytes};

/// One changed file in a revision range, with line counts from `--numstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
}

pub struct WorkspaceManager {
    base: PathBuf,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkspaceManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The per-repo checkout mutex. Callers take `lock_owned()` and hold the
    /// guard for checkout plus every batch run against that checkout.
    pub fn repo_lock(&self, repo_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("repo lock map");
        locks
            .entry(repo_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Mirror location for a repository; honors the per-repo override.
    pub fn mirror_path(&self, repo: &RepoConfig) -> PathBuf {
        match &repo.local_path {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => self.base.join(&repo.repo_id),
        }
    }

    /// Clones the repository if no mirror exists yet. Idempotent; a leftover
    /// partial directory without `.git` is removed and re-cloned.
    pub async fn ensure_cloned(&self, repo: &RepoConfig) -> GitResult<PathBuf> {
        let path = self.mirror_path(repo);
        if path.join(".git").is_dir() {
            return Ok(path);
        }
        if path.exists() {
            warn!(repo_id = %repo.repo_id, "removing partial mirror before re-clone");
            std::fs::remove_dir_all(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = authenticated_url(&repo.clone_url, &repo.auth)?;
        let target = path.to_string_lossy().to_string();
        info!(repo_id = %repo.repo_id, url = %redact_url(&repo.clone_url), "cloning mirror");
        run_git(None, &["clone", &url, &target], Some(&url)).await?;
        Ok(path)
    }

    /// Fetches updates and resets the working tree to `git_ref`.
    ///
    /// The ref may be a SHA, a local branch or a remote branch name; remote
    /// branches resolve through `origin/<ref>`. Returns the checkout path.
    pub async fn checkout(&self, repo: &RepoConfig, git_ref: &str) -> GitResult<PathBuf> {
        let path = self.ensure_cloned(repo).await?;
        self.fetch(&path, repo).await?;
        let resolved = self.resolve_ref(&path, git_ref).await?;
        run_git(Some(&path), &["checkout", "--force", "--detach", &resolved], None).await?;
        run_git(Some(&path), &["reset", "--hard", &resolved], None).await?;
        debug!(repo_id = %repo.repo_id, git_ref, %resolved, "checkout complete");
        Ok(path)
    }

    /// Changed files between two revisions, in change order.
    ///
    /// `base_ref = None` means "the parent of head", which for a root commit
    /// degrades to the commit's own file list.
    pub async fn list_changed_files(
        &self,
        repo: &RepoConfig,
        base_ref: Option<&str>,
        head_ref: &str,
    ) -> GitResult<Vec<ChangedFile>> {
        let path = self.mirror_path(repo);
        let base = base_ref.map(str::to_string).unwrap_or_else(|| format!("{head_ref}^"));
        if base == head_ref {
            return Ok(Vec::new());
        }

        let head = self.resolve_ref(&path, head_ref).await?;
        let range_base = match self.resolve_ref(&path, &base).await {
            Ok(b) => Some(b),
            // Root commit: no parent to diff against.
            Err(GitError::Command { .. }) if base_ref.is_none() => None,
            Err(e) => return Err(e),
        };

        let out = match &range_base {
            Some(b) => run_git(Some(&path), &["diff", "--numstat", b, &head], None).await?,
            None => run_git(Some(&path), &["show", "--numstat", "--format=", &head], None).await?,
        };
        Ok(parse_numstat(&out))
    }

    /// File contents at a revision; `None` when the path does not exist there.
    pub async fn read_file(
        &self,
        repo: &RepoConfig,
        git_ref: &str,
        file_path: &str,
    ) -> GitResult<Option<Vec<u8>>> {
        let path = self.mirror_path(repo);
        let spec = format!("{git_ref}:{file_path}");
        run_git_bytes(&path, &["show", &spec]).await
    }

    /// Byte size of a file in the current working tree, if present.
    /// The planner weighs files from the checked-out tree.
    pub fn file_size(&self, checkout: &Path, file_path: &str) -> Option<u64> {
        std::fs::metadata(checkout.join(file_path))
            .ok()
            .map(|m| m.len())
    }

    /// Author timestamp of a revision; drives effective-from filtering.
    pub async fn commit_timestamp(
        &self,
        repo: &RepoConfig,
        git_ref: &str,
    ) -> GitResult<DateTime<Utc>> {
        let path = self.mirror_path(repo);
        let resolved = self.resolve_ref(&path, git_ref).await?;
        let out = run_git(Some(&path), &["log", "-1", "--format=%ct", &resolved], None).await?;
        let secs: i64 = out.trim().parse().map_err(|_| GitError::BadOutput {
            command: "log -1 --format=%ct".into(),
        })?;
        Ok(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH))
    }

    /// `ls-remote` connectivity/credential probe; does not touch the mirror.
    pub async fn probe_remote(&self, repo: &RepoConfig) -> GitResult<()> {
        let url = authenticated_url(&repo.clone_url, &repo.auth)?;
        run_git(None, &["ls-remote", "--heads", &url], Some(&url)).await?;
        Ok(())
    }

    /// Whether the working tree diverged from HEAD (assistant side effects).
    pub async fn working_tree_dirty(&self, checkout: &Path) -> GitResult<bool> {
        let out = run_git(Some(checkout), &["status", "--porcelain"], None).await?;
        Ok(!out.trim().is_empty())
    }

    /// Resolved commit SHA of `git_ref` after a fresh fetch; pins a concrete
    /// revision for manually triggered reviews.
    pub async fn head_commit(&self, repo: &RepoConfig, git_ref: &str) -> GitResult<String> {
        let path = self.ensure_cloned(repo).await?;
        self.fetch(&path, repo).await?;
        self.resolve_ref(&path, git_ref).await
    }

    /// Fetch with the URL given explicitly so credentials never persist in
    /// .git/config.
    async fn fetch(&self, path: &Path, repo: &RepoConfig) -> GitResult<()> {
        let url = authenticated_url(&repo.clone_url, &repo.auth)?;
        run_git(
            Some(path),
            &[
                "fetch",
                "--prune",
                &url,
                "+refs/heads/*:refs/remotes/origin/*",
            ],
            Some(&url),
        )
        .await?;
        Ok(())
    }

    async fn resolve_ref(&self, path: &Path, git_ref: &str) -> GitResult<String> {
        let direct = format!("{git_ref}^{{commit}}");
        match run_git(Some(path), &["rev-parse", "--verify", "--quiet", &direct], None).await {
            Ok(out) if !out.trim().is_empty() => return Ok(out.trim().to_string()),
            _ => {}
        }
        let remote = format!("origin/{git_ref}^{{commit}}");
        let out = run_git(Some(path), &["rev-parse", "--verify", &remote], None)
            .await
            .map_err(|_| GitError::Command {
                command: format!("rev-parse {git_ref}"),
                stderr: format!("unknown revision {git_ref}"),
            })?;
        Ok(out.trim().to_string())
    }
}

/// Parses `--numstat` output. Binary files report `-` counts, recorded as 0.
fn parse_numstat(out: &str) -> Vec<ChangedFile> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let additions = parts.next()?.trim();
            let deletions = parts.next()?.trim();
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            Some(ChangedFile {
                path: path.to_string(),
                additions: additions.parse().unwrap_or(0),
                deletions: deletions.parse().unwrap_or(0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numstat_parsing_handles_binary_markers() {
        let out = "10\t2\tsrc/lib.rs\n-\t-\tassets/logo.png\n0\t5\tREADME.md\n";
        let files = parse_numstat(out);
        assert_eq!(files.len(), 3);
        assert_eq!(
            files[0],
            ChangedFile {
                path: "src/lib.rs".into(),
                additions: 10,
                deletions: 2
            }
        );
        assert_eq!(files[1].additions, 0);
        assert_eq!(files[2].deletions, 5);
    }

    #[test]
    fn numstat_preserves_change_order() {
        let out = "1\t1\tb.rs\n1\t1\ta.rs\n";
        let files = parse_numstat(out);
        assert_eq!(files[0].path, "b.rs");
        assert_eq!(files[1].path, "a.rs");
    }

    #[test]
    fn mirror_path_prefers_override() {
        let ws = WorkspaceManager::new("/data/mirrors");
        let mut repo = test_repo();
        assert_eq!(
            ws.mirror_path(&repo),
            PathBuf::from("/data/mirrors/repo-1")
        );
        repo.local_path = Some("/srv/custom".into());
        assert_eq!(ws.mirror_path(&repo), PathBuf::from("/srv/custom"));
    }

    #[test]
    fn repo_lock_is_shared_per_repo() {
        let ws = WorkspaceManager::new("/tmp/x");
        let a = ws.repo_lock("r1");
        let b = ws.repo_lock("r1");
        let c = ws.repo_lock("r2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    fn test_repo() -> RepoConfig {
        use review_store::models::*;
        RepoConfig {
            repo_id: "repo-1".into(),
            name: "demo".into(),
            clone_url: "https://git.example.com/team/app.git".into(),
            branch: "main".into(),
            platform: Platform::GitLab,
            auth: RepoAuth::None,
            trigger_mode: TriggerMode::Polling,
            polling_interval_minutes: 5,
            effective_from: None,
            poll_commits: true,
            poll_mrs: false,
            enable_comment: true,
            enabled: true,
            local_path: None,
            webhook_secret: None,
            api_base: None,
            clone_status: CloneStatus::Absent,
            last_check_time: None,
        }
    }
}
