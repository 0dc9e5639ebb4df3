//! Periodic ingestion: probes enabled repositories for new commits and MRs.
//!
//! One logical ticker drives everything. Per repository and tick:
//! skip while a previous probe is still in flight, respect the per-repo
//! interval, query the platform for deltas past the revision marker, filter
//! by effective-from, and enqueue tasks under the at-most-one rule.
//!
//! Markers are NOT advanced here. The first probe of a repo records the
//! newest revision as a baseline (no task); afterwards the marker only moves
//! through the post-finalize hook once the corresponding task completes, so
//! transient failures are retried on the next tick.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use git_platform::{extract_project_path, ApiAuth, PlatformClient, PlatformConfig};
use review_store::models::{
    NewTask, RepoAuth, RepoConfig, ReviewStrategy, RevisionKind,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::retry::with_backoff;
use crate::ReviewEngine;

/// How many revisions one probe fetches from the platform.
const PROBE_LIMIT: u32 = 10;

/// Poller state exposed by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    pub running: bool,
    pub repos_count: usize,
    pub enabled_repos: usize,
    pub interval_minutes: u64,
}

pub struct Poller {
    engine: Arc<ReviewEngine>,
    running: AtomicBool,
    in_flight: StdMutex<HashSet<String>>,
}

impl Poller {
    pub fn new(engine: Arc<ReviewEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            running: AtomicBool::new(false),
            in_flight: StdMutex::new(HashSet::new()),
        })
    }

    /// Spawns the ticker loop; ticks are cheap when the poller is stopped.
    pub fn spawn(self: &Arc<Self>) {
        let poller = self.clone();
        let mut shutdown = self.engine.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if poller.running.load(Ordering::Acquire) {
                            poller.tick().await;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("poller ticker stopped by shutdown");
                            return;
                        }
                    }
                }
            }
        });
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("poller already running");
        } else {
            info!("poller started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("poller stopped");
        }
    }

    pub async fn status(&self) -> PollerStatus {
        let repos = self
            .engine
            .store
            .repos()
            .list()
            .await
            .unwrap_or_default();
        let enabled = repos
            .iter()
            .filter(|r| r.enabled && r.trigger_mode.polls())
            .count();
        let interval = self
            .engine
            .store
            .settings()
            .get_u64("polling_interval_minutes", 5)
            .await
            .unwrap_or(5);
        PollerStatus {
            running: self.running.load(Ordering::Acquire),
            repos_count: repos.len(),
            enabled_repos: enabled,
            interval_minutes: interval,
        }
    }

    async fn tick(self: &Arc<Self>) {
        let repos = match self.engine.store.repos().list_pollable().await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(error = %e, "poller cannot list repositories");
                return;
            }
        };
        let default_interval = self
            .engine
            .store
            .settings()
            .get_u64("polling_interval_minutes", 5)
            .await
            .unwrap_or(5);

        for repo in repos {
            if !self.due(&repo, default_interval) {
                continue;
            }
            // Skip when the previous probe of this repo is still running.
            if !self
                .in_flight
                .lock()
                .expect("in-flight set")
                .insert(repo.repo_id.clone())
            {
                debug!(repo_id = %repo.repo_id, "probe still in flight; skipping tick");
                continue;
            }

            let poller = self.clone();
            tokio::spawn(async move {
                if let Err(e) = poller.probe_repo(&repo).await {
                    warn!(repo_id = %repo.repo_id, error = %e, "repository probe failed");
                }
                // last_check_time is stamped regardless of the outcome.
                if let Err(e) = poller
                    .engine
                    .store
                    .repos()
                    .set_last_check(&repo.repo_id, Utc::now())
                    .await
                {
                    warn!(repo_id = %repo.repo_id, error = %e, "failed to stamp last_check_time");
                }
                poller
                    .in_flight
                    .lock()
                    .expect("in-flight set")
                    .remove(&repo.repo_id);
            });
        }
    }

    fn due(&self, repo: &RepoConfig, default_interval_minutes: u64) -> bool {
        let interval = if repo.polling_interval_minutes >= 1 {
            repo.polling_interval_minutes as i64
        } else {
            default_interval_minutes.max(1) as i64
        };
        match repo.last_check_time {
            Some(last) => Utc::now() - last >= chrono::Duration::minutes(interval),
            None => true,
        }
    }

    /// Probes a single repository for new revisions and enqueues tasks.
    pub async fn probe_repo(&self, repo: &RepoConfig) -> Result<(), EngineError> {
        let client = self.client_for(repo).await?;
        let Some(project_path) = extract_project_path(&repo.clone_url) else {
            warn!(repo_id = %repo.repo_id, "cannot derive project path from clone url");
            return Ok(());
        };

        if repo.poll_commits {
            self.probe_commits(repo, &client, &project_path).await?;
        }
        if repo.poll_mrs {
            self.probe_mrs(repo, &client, &project_path).await?;
        }
        Ok(())
    }

    async fn probe_commits(
        &self,
        repo: &RepoConfig,
        client: &PlatformClient,
        project_path: &str,
    ) -> Result<(), EngineError> {
        let markers = self.engine.store.revisions();
        let marker = markers
            .get(&repo.repo_id, &repo.branch, RevisionKind::Commit)
            .await?;

        let commits = with_backoff(
            "list commits",
            |e: &git_platform::PlatformError| e.is_transient(),
            || client.list_commits(project_path, &repo.branch, PROBE_LIMIT),
        )
        .await?;
        if commits.is_empty() {
            return Ok(());
        }

        // First probe: record a baseline so an old repository does not flood
        // the queue with historical commits.
        let Some(marker) = marker else {
            let newest = &commits[0];
            info!(repo_id = %repo.repo_id, commit = %newest.id, "first probe; recording commit baseline");
            markers
                .compare_and_advance(
                    &repo.repo_id,
                    &repo.branch,
                    RevisionKind::Commit,
                    None,
                    &newest.id,
                    Utc::now(),
                )
                .await?;
            return Ok(());
        };

        // Platform lists newest first; keep commits above the marker and
        // restore chronological order for chained marker advances.
        let mut fresh: Vec<_> = commits
            .into_iter()
            .take_while(|c| c.id != marker.last_seen_id)
            .collect();
        fresh.reverse();
        if fresh.is_empty() {
            return Ok(());
        }
        info!(repo_id = %repo.repo_id, count = fresh.len(), "new commits found");

        let mut prev = marker.last_seen_id.clone();
        for commit in fresh {
            if let (Some(effective_from), Some(at)) = (repo.effective_from, commit.committed_at) {
                if at < effective_from {
                    debug!(repo_id = %repo.repo_id, commit = %commit.id, "before effective_from; ignored");
                    continue;
                }
            }
            let input = NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy: ReviewStrategy::Commit,
                revision_ref: commit.id.clone(),
                base_ref: None,
                branch: repo.branch.clone(),
                author_name: commit.author_name.clone(),
                author_email: commit.author_email.clone(),
                poll_kind: Some(RevisionKind::Commit),
                marker_prev: Some(prev.clone()),
            };
            match self.engine.submit(input).await {
                Ok(task) => {
                    debug!(repo_id = %repo.repo_id, task_id = %task.task_id, commit = %commit.id, "commit task enqueued")
                }
                Err(EngineError::Duplicate) => {
                    debug!(repo_id = %repo.repo_id, commit = %commit.id, "task already exists")
                }
                Err(e) => return Err(e),
            }
            prev = commit.id;
        }
        Ok(())
    }

    async fn probe_mrs(
        &self,
        repo: &RepoConfig,
        client: &PlatformClient,
        project_path: &str,
    ) -> Result<(), EngineError> {
        let markers = self.engine.store.revisions();
        let marker = markers
            .get(&repo.repo_id, &repo.branch, RevisionKind::Mr)
            .await?;
        let last_iid: u64 = marker
            .as_ref()
            .and_then(|m| m.last_seen_id.parse().ok())
            .unwrap_or(0);

        let mrs = with_backoff(
            "list merge requests",
            |e: &git_platform::PlatformError| e.is_transient(),
            || client.list_open_mrs(project_path, PROBE_LIMIT),
        )
        .await?;

        if marker.is_none() {
            let Some(max_iid) = mrs.iter().map(|mr| mr.iid).max() else {
                return Ok(());
            };
            info!(repo_id = %repo.repo_id, iid = max_iid, "first probe; recording MR baseline");
            markers
                .compare_and_advance(
                    &repo.repo_id,
                    &repo.branch,
                    RevisionKind::Mr,
                    None,
                    &max_iid.to_string(),
                    Utc::now(),
                )
                .await?;
            return Ok(());
        }

        let mut fresh: Vec<_> = mrs.into_iter().filter(|mr| mr.iid > last_iid).collect();
        fresh.sort_by_key(|mr| mr.iid);
        if fresh.is_empty() {
            return Ok(());
        }
        info!(repo_id = %repo.repo_id, count = fresh.len(), "new merge requests found");

        let mut prev = last_iid.to_string();
        for mr in fresh {
            if let (Some(effective_from), Some(at)) = (repo.effective_from, mr.updated_at) {
                if at < effective_from {
                    debug!(repo_id = %repo.repo_id, iid = mr.iid, "before effective_from; ignored");
                    continue;
                }
            }
            let input = NewTask {
                repo_id: repo.repo_id.clone(),
                project_name: repo.name.clone(),
                strategy: ReviewStrategy::MergeRequest,
                revision_ref: mr.iid.to_string(),
                base_ref: Some(mr.target_branch.clone()),
                branch: mr.source_branch.clone(),
                author_name: mr.author_name.clone(),
                author_email: None,
                poll_kind: Some(RevisionKind::Mr),
                marker_prev: Some(prev.clone()),
            };
            match self.engine.submit(input).await {
                Ok(task) => {
                    debug!(repo_id = %repo.repo_id, task_id = %task.task_id, iid = mr.iid, "MR task enqueued")
                }
                Err(EngineError::Duplicate) => {
                    debug!(repo_id = %repo.repo_id, iid = mr.iid, "task already exists")
                }
                Err(e) => return Err(e),
            }
            prev = mr.iid.to_string();
        }
        Ok(())
    }

    async fn client_for(&self, repo: &RepoConfig) -> Result<PlatformClient, EngineError> {
        let api_base = match &repo.api_base {
            Some(base) if !base.is_empty() => base.clone(),
            _ => {
                self.engine
                    .store
                    .settings()
                    .get_or("git_api_base", "")
                    .await?
            }
        };
        if api_base.is_empty() {
            warn!(repo_id = %repo.repo_id, "no platform API base configured");
        }
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
        Ok(PlatformClient::from_config(PlatformConfig {
            kind: repo.platform,
            base_api: api_base,
            auth,
        })?)
    }
}
