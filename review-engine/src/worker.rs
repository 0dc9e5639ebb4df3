//! Per-task execution pipeline: checkout → plan → batches → finalize.
//!
//! The worker holds the repository's checkout mutex for the whole pipeline,
//! so per repo at most one checkout and one assistant invocation are live at
//! a time. Batch failures are tolerated: the task completes if at least one
//! batch succeeded (or the plan was empty), and fails only when every batch
//! failed or the pipeline broke before running any.

use std::time::Duration;

use assistant_runner::{BatchInvocation, RunnerError};
use change_planner::{plan_batches, BatchPlan, PlannerConfig};
use review_store::models::{
    BatchResult, BatchStatus, CloneStatus, RepoConfig, ReviewStrategy, ReviewTask, SummaryFields,
    TaskStatus,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::comment::{format_review_comment, post_review_comment};
use crate::errors::EngineResult;
use crate::prompts;
use crate::retry::with_backoff;
use crate::ReviewEngine;

/// File extensions considered review-worthy; everything else in a change set
/// is ignored (lockfiles, assets, generated artifacts).
const VALID_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".go", ".cpp", ".c", ".h", ".rs", ".rb",
    ".php", ".cs", ".swift", ".kt", ".scala", ".vue", ".svelte",
];

fn is_reviewable(path: &str) -> bool {
    VALID_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

impl ReviewEngine {
    /// Runs one dequeued task to a terminal state. Every early exit
    /// finalizes the task; only store-level failures propagate.
    pub(crate) async fn execute_task(&self, task_id: Uuid) -> EngineResult<()> {
        let tasks = self.store.tasks();
        if !tasks.mark_processing(task_id).await? {
            // Cancelled (or otherwise finalized) while still queued.
            debug!(%task_id, "skipping task no longer pending");
            return Ok(());
        }
        let task = tasks.get(task_id).await?;
        info!(
            %task_id,
            repo_id = %task.repo_id,
            strategy = task.strategy.as_str(),
            revision = %task.revision_ref,
            "task picked up"
        );

        let repo = match self.store.repos().get(&task.repo_id).await {
            Ok(repo) => repo,
            Err(review_store::StoreError::RepoNotFound(_)) => {
                self.fail_task(&task, "repository configuration missing", None)
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .expect("cancel registry")
            .insert(task_id, cancel_tx);

        let result = self.run_pipeline(&task, &repo, cancel_rx).await;

        self.cancels.lock().expect("cancel registry").remove(&task_id);

        if let Err(e) = &result {
            warn!(%task_id, error = %e, "pipeline error");
            // Internal invariant errors fail the task; the process continues.
            let _ = self.fail_task(&task, &format!("internal error: {e}"), None).await;
        }
        result
    }

    async fn run_pipeline(
        &self,
        task: &ReviewTask,
        repo: &RepoConfig,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> EngineResult<()> {
        let tasks = self.store.tasks();

        // Steps 2: per-repo checkout mutex, held until all batches are done.
        let _repo_guard = self.workspace.repo_lock(&repo.repo_id).lock_owned().await;

        let checkout_ref = match task.strategy {
            ReviewStrategy::Commit => task.revision_ref.clone(),
            ReviewStrategy::MergeRequest => task.branch.clone(),
        };

        if !self.workspace.mirror_path(repo).join(".git").is_dir() {
            self.store
                .repos()
                .set_clone_status(&repo.repo_id, CloneStatus::Cloning)
                .await?;
        }
        let checkout = match with_backoff(
            "checkout",
            |e: &git_workspace::errors::GitError| e.is_transient(),
            || self.workspace.checkout(repo, &checkout_ref),
        )
        .await
        {
            Ok(path) => {
                self.store
                    .repos()
                    .set_clone_status(&repo.repo_id, CloneStatus::Cloned)
                    .await?;
                path
            }
            Err(e) => {
                self.store
                    .repos()
                    .set_clone_status(&repo.repo_id, CloneStatus::Failed)
                    .await?;
                self.fail_task(task, &format!("checkout failed: {e}"), None)
                    .await?;
                return Ok(());
            }
        };

        // Ingestion already filters on effective-from, but manual triggers
        // and stale webhooks can still carry an old revision; the authored
        // timestamp in the mirror is authoritative.
        if let Some(effective_from) = repo.effective_from {
            if task.strategy == ReviewStrategy::Commit {
                match self
                    .workspace
                    .commit_timestamp(repo, &task.revision_ref)
                    .await
                {
                    Ok(at) if at < effective_from => {
                        info!(
                            task_id = %task.task_id,
                            revision = %task.revision_ref,
                            "revision predates effective-from; skipping review"
                        );
                        tasks.set_plan(task.task_id, 0, &[]).await?;
                        self.complete_task(
                            task,
                            repo,
                            &BatchPlan { batches: vec![] },
                            "Revision predates the effective-from cutoff; review skipped."
                                .to_string(),
                            true,
                        )
                        .await?;
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(task_id = %task.task_id, error = %e, "cannot read commit timestamp"),
                }
            }
        }

        // Step 3: changed files and the batch plan.
        let changed = match self
            .workspace
            .list_changed_files(repo, task.base_ref.as_deref(), head_ref(task))
            .await
        {
            Ok(files) => files,
            Err(e) => {
                self.fail_task(task, &format!("diff failed: {e}"), None).await?;
                return Ok(());
            }
        };

        let reviewable: Vec<(String, u64)> = changed
            .iter()
            .filter(|f| is_reviewable(&f.path))
            .map(|f| {
                let bytes = self.workspace.file_size(&checkout, &f.path).unwrap_or(0);
                (f.path.clone(), bytes)
            })
            .collect();

        let settings = self.store.settings();
        let max_tokens = settings
            .get_u64("max_tokens_per_batch", self.config.max_tokens_per_batch)
            .await?;
        let map_tokens = if settings.get_bool("assistant_no_repo_map", false).await? {
            None
        } else {
            Some(
                settings
                    .get_u64("assistant_map_tokens", self.config.context_map_tokens)
                    .await?,
            )
        };
        let plan = plan_batches(
            &reviewable,
            &PlannerConfig {
                max_tokens_per_batch: max_tokens,
                context_map_tokens: map_tokens.unwrap_or(self.config.context_map_tokens),
                chars_per_token: self.config.chars_per_token,
            },
        );

        let all_files: Vec<String> = plan
            .flattened_paths()
            .into_iter()
            .map(str::to_string)
            .collect();
        tasks.set_plan(task.task_id, plan.len(), &all_files).await?;

        // Empty change set: complete immediately with a clean score.
        if plan.is_empty() {
            debug!(task_id = %task.task_id, "empty change set; completing without batches");
            self.complete_task(task, repo, &plan, String::new(), true).await?;
            return Ok(());
        }

        info!(
            task_id = %task.task_id,
            batches = plan.len(),
            files = all_files.len(),
            "batch plan ready"
        );

        // Step 4: run batches in plan order, tolerating per-batch failures.
        let invocation_base = self.invocation_base(map_tokens).await?;
        let prompt = match task.strategy {
            ReviewStrategy::Commit => prompts::commit_prompt(),
            ReviewStrategy::MergeRequest => prompts::mr_prompt(
                task.base_ref.as_deref().unwrap_or("main"),
            ),
        };
        let retry_count = settings.get_u64("assistant_retry_count", 0).await? as usize;

        let mut reports: Vec<(usize, Vec<String>, String)> = Vec::new();
        let mut any_success = false;

        for batch in &plan.batches {
            if *self.shutdown_rx.borrow() {
                self.fail_task(task, "shutdown", Some(reports.as_slice())).await?;
                return Ok(());
            }
            if *cancel_rx.borrow() {
                debug!(task_id = %task.task_id, batch = batch.index, "cancellation observed between batches");
                self.finalize_cancelled(task).await?;
                return Ok(());
            }

            let files = batch.file_paths();
            if batch.oversize {
                warn!(
                    task_id = %task.task_id,
                    batch = batch.index,
                    weight = batch.total_weight(),
                    "batch exceeds token budget; submitting anyway"
                );
            }
            let invocation = BatchInvocation {
                prompt: prompt.clone(),
                files: files.clone(),
                ..invocation_base.clone()
            };

            let mut outcome = assistant_runner::run_batch(&checkout, &invocation, &mut cancel_rx).await;
            let mut attempts = 0;
            while attempts < retry_count
                && matches!(outcome, Err(RunnerError::NonZeroExit { .. }))
            {
                attempts += 1;
                debug!(task_id = %task.task_id, batch = batch.index, attempts, "retrying failed batch");
                outcome = assistant_runner::run_batch(&checkout, &invocation, &mut cancel_rx).await;
            }

            match outcome {
                Ok(stdout) => {
                    any_success = true;
                    tasks
                        .update_progress(
                            task.task_id,
                            batch.index,
                            BatchResult {
                                index: batch.index,
                                status: BatchStatus::Success,
                                files: files.clone(),
                                error: None,
                            },
                        )
                        .await?;
                    reports.push((batch.index, files, stdout));
                }
                Err(RunnerError::Cancelled) => {
                    tasks
                        .update_progress(
                            task.task_id,
                            batch.index,
                            BatchResult {
                                index: batch.index,
                                status: BatchStatus::Cancelled,
                                files,
                                error: None,
                            },
                        )
                        .await?;
                    if *self.shutdown_rx.borrow() {
                        self.fail_task(task, "shutdown", Some(reports.as_slice())).await?;
                    } else {
                        self.finalize_cancelled(task).await?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    let reason = match &e {
                        RunnerError::Timeout => "timeout".to_string(),
                        other => other.to_string(),
                    };
                    warn!(task_id = %task.task_id, batch = batch.index, error = %reason, "batch failed");
                    tasks
                        .update_progress(
                            task.task_id,
                            batch.index,
                            BatchResult {
                                index: batch.index,
                                status: BatchStatus::Failed,
                                files,
                                error: Some(reason),
                            },
                        )
                        .await?;
                }
            }

            // Side effects are confined to the checkout; divergence is
            // logged, never rolled back.
            if let Ok(true) = self.workspace.working_tree_dirty(&checkout).await {
                warn!(task_id = %task.task_id, batch = batch.index, "working copy diverged after batch");
            }
        }

        // Step 5: merge and finalize.
        let merged = merge_batch_reports(&reports);
        if any_success {
            self.complete_task(task, repo, &plan, merged, false).await?;
        } else {
            self.fail_task(task, "all batches failed", Some(reports.as_slice())).await?;
        }
        Ok(())
    }

    async fn invocation_base(&self, map_tokens: Option<u64>) -> EngineResult<BatchInvocation> {
        let settings = self.store.settings();
        Ok(BatchInvocation {
            assistant_bin: self.config.assistant_bin.clone(),
            prompt: String::new(),
            files: Vec::new(),
            map_tokens,
            api_base: settings
                .get_or("model_api_base", "http://127.0.0.1:8000/v1")
                .await?,
            api_key: settings.get_or("model_api_key", "").await?,
            model_name: settings.get_or("model_name", "").await?,
            timeout: Duration::from_secs(
                settings
                    .get_u64("assistant_timeout_secs", self.config.batch_timeout.as_secs())
                    .await?,
            ),
            grace: self.config.termination_grace,
        })
    }

    /// Finalize as completed, advance the revision marker when this task was
    /// poller-created, and post the comment best-effort.
    async fn complete_task(
        &self,
        task: &ReviewTask,
        repo: &RepoConfig,
        plan: &BatchPlan,
        merged_report: String,
        empty_change_set: bool,
    ) -> EngineResult<()> {
        // A skipped/empty review carries an informational report that must
        // not go through issue parsing.
        let parsed = if empty_change_set {
            report_parser::analyze("")
        } else {
            report_parser::analyze(&merged_report)
        };
        let fields = SummaryFields {
            issues_count: parsed.counts.total(),
            critical_count: parsed.counts.critical,
            warning_count: parsed.counts.warning,
            suggestion_count: parsed.counts.suggestion,
            quality_score: Some(parsed.quality_score),
            summary: Some(parsed.summary),
            error_message: None,
        };
        let report = if empty_change_set && merged_report.is_empty() {
            "No reviewable code files in this change set.".to_string()
        } else {
            merged_report
        };
        self.store
            .tasks()
            .finalize(
                task.task_id,
                TaskStatus::Completed,
                &parsed.issues,
                fields,
                Some(report.clone()),
            )
            .await?;
        info!(
            task_id = %task.task_id,
            batches = plan.len(),
            issues = parsed.issues.len(),
            score = parsed.quality_score,
            "task completed"
        );

        self.advance_marker_for(task, repo).await;

        let comment_enabled = repo.enable_comment
            && self
                .store
                .settings()
                .get_bool("enable_comment", true)
                .await
                .unwrap_or(true);
        if comment_enabled && !empty_change_set {
            let body = format_review_comment(task, &report);
            post_review_comment(repo, &self.store.settings(), task, &body).await;
        }
        Ok(())
    }

    /// Post-finalize hook: lagging, monotone marker advance (poll tasks only).
    async fn advance_marker_for(&self, task: &ReviewTask, repo: &RepoConfig) {
        let Some(kind) = task.poll_kind else { return };
        let result = self
            .store
            .revisions()
            .compare_and_advance(
                &repo.repo_id,
                &repo.branch,
                kind,
                task.marker_prev.as_deref(),
                &task.revision_ref,
                chrono::Utc::now(),
            )
            .await;
        match result {
            Ok(true) => {
                debug!(task_id = %task.task_id, revision = %task.revision_ref, "revision marker advanced")
            }
            Ok(false) => {}
            Err(e) => warn!(task_id = %task.task_id, error = %e, "marker advance failed"),
        }
    }

    pub(crate) async fn finalize_cancelled(&self, task: &ReviewTask) -> EngineResult<()> {
        self.store
            .tasks()
            .finalize(
                task.task_id,
                TaskStatus::Cancelled,
                &[],
                SummaryFields::default(),
                None,
            )
            .await?;
        info!(task_id = %task.task_id, "task cancelled");
        Ok(())
    }

    async fn fail_task(
        &self,
        task: &ReviewTask,
        reason: &str,
        reports: Option<&[(usize, Vec<String>, String)]>,
    ) -> EngineResult<()> {
        let fields = SummaryFields {
            error_message: Some(reason.to_string()),
            ..Default::default()
        };
        let report = reports.map(merge_batch_reports).filter(|r| !r.is_empty());
        match self
            .store
            .tasks()
            .finalize(task.task_id, TaskStatus::Failed, &[], fields, report)
            .await
        {
            Ok(()) => {
                warn!(task_id = %task.task_id, reason, "task failed");
                Ok(())
            }
            // Already terminal (e.g. cancelled racing a failure): keep the
            // first terminal state.
            Err(review_store::StoreError::TerminalTask { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Head ref for diffing: the commit SHA for commit reviews, the source
/// branch for merge requests.
fn head_ref(task: &ReviewTask) -> &str {
    match task.strategy {
        ReviewStrategy::Commit => &task.revision_ref,
        ReviewStrategy::MergeRequest => &task.branch,
    }
}

/// Concatenates per-batch stdout, with per-batch headers once there is more
/// than one batch.
fn merge_batch_reports(reports: &[(usize, Vec<String>, String)]) -> String {
    match reports {
        [] => String::new(),
        [(_, _, only)] => only.clone(),
        many => {
            let mut out = String::new();
            for (index, files, report) in many {
                out.push_str(&format!(
                    "## Batch {} ({} file{})\n\n",
                    index + 1,
                    files.len(),
                    if files.len() == 1 { "" } else { "s" }
                ));
                out.push_str(report.trim());
                out.push_str("\n\n");
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewable_extension_filter() {
        assert!(is_reviewable("src/main.rs"));
        assert!(is_reviewable("web/app.tsx"));
        assert!(!is_reviewable("Cargo.lock"));
        assert!(!is_reviewable("assets/logo.png"));
    }

    #[test]
    fn merged_report_keeps_single_batch_verbatim() {
        let merged = merge_batch_reports(&[(0, vec!["a.rs".into()], "only report".into())]);
        assert_eq!(merged, "only report");
    }

    #[test]
    fn merged_report_headers_multiple_batches() {
        let merged = merge_batch_reports(&[
            (0, vec!["a.rs".into()], "first".into()),
            (1, vec!["b.rs".into(), "c.rs".into()], "second".into()),
        ]);
        assert!(merged.contains("## Batch 1 (1 file)"));
        assert!(merged.contains("## Batch 2 (2 files)"));
        assert!(merged.contains("first"));
        assert!(merged.contains("second"));
    }
}
