//! Task store: durable review tasks, their issues and batch progress.
//!
//! All mutations run on the single serialized connection, so readers observe
//! either pre- or post-state of an update, never a partial write. Terminal
//! statuses are write-once; `finalize` refuses to touch a terminal task.

use chrono::Utc;
use tokio_rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::models::{
    BatchResult, NewTask, ReviewIssue, ReviewStrategy, ReviewSummary, ReviewTask, SummaryFields,
    TaskFilter, TaskStatus,
};
use crate::util::{bad_col, dt_to_ts, other_err, ts_to_dt};

const TASK_COLUMNS: &str = "task_id, repo_id, project_name, strategy, revision_ref, base_ref, \
     branch, author_name, author_email, status, batch_total, batch_current, batch_results, \
     issues_count, critical_count, warning_count, suggestion_count, quality_score, \
     files_reviewed, report, summary, error_message, poll_kind, marker_prev, \
     created_at, started_at, finished_at, processing_time_seconds";

/// Handle over the shared connection; cheap to clone.
#[derive(Clone)]
pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates a pending task.
    ///
    /// Enforces the at-most-one rule: rejected with [`StoreError::DuplicateTask`]
    /// when a non-terminal task already exists for the same
    /// `(repo_id, strategy, revision_ref)`.
    pub async fn create(&self, input: NewTask) -> StoreResult<ReviewTask> {
        let task = ReviewTask {
            task_id: Uuid::new_v4(),
            repo_id: input.repo_id,
            project_name: input.project_name,
            strategy: input.strategy,
            revision_ref: input.revision_ref,
            base_ref: input.base_ref,
            branch: input.branch,
            author_name: input.author_name,
            author_email: input.author_email,
            status: TaskStatus::Pending,
            batch_total: 0,
            batch_current: 0,
            batch_results: Vec::new(),
            issues_count: 0,
            critical_count: 0,
            warning_count: 0,
            suggestion_count: 0,
            quality_score: None,
            files_reviewed: Vec::new(),
            report: None,
            summary: None,
            error_message: None,
            poll_kind: input.poll_kind,
            marker_prev: input.marker_prev,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            processing_time_seconds: None,
        };

        let row = task.clone();
        let result = self
            .conn
            .call(move |db| {
                db.execute(
                    &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)"),
                    rusqlite::params![
                        row.task_id.to_string(),
                        row.repo_id,
                        row.project_name,
                        row.strategy.as_str(),
                        row.revision_ref,
                        row.base_ref,
                        row.branch,
                        row.author_name,
                        row.author_email,
                        row.status.as_str(),
                        row.batch_total as i64,
                        row.batch_current as i64,
                        serde_json::to_string(&row.batch_results).map_err(other_err)?,
                        row.issues_count as i64,
                        row.critical_count as i64,
                        row.warning_count as i64,
                        row.suggestion_count as i64,
                        row.quality_score.map(|v| v as i64),
                        serde_json::to_string(&row.files_reviewed).map_err(other_err)?,
                        row.report,
                        None::<String>,
                        row.error_message,
                        row.poll_kind.map(|k| k.as_str()),
                        row.marker_prev,
                        dt_to_ts(&row.created_at),
                        None::<i64>,
                        None::<i64>,
                        None::<f64>,
                    ],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(task),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateTask {
                repo_id: task.repo_id,
                strategy: task.strategy.as_str().to_string(),
                revision_ref: task.revision_ref,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a pending task to `processing` and stamps `started_at`.
    /// Returns `false` when the task is no longer pending (e.g. cancelled
    /// while queued), in which case the caller must skip it.
    pub async fn mark_processing(&self, task_id: Uuid) -> StoreResult<bool> {
        let id = task_id.to_string();
        let now = dt_to_ts(&Utc::now());
        let changed = self
            .conn
            .call(move |db| {
                let n = db.execute(
                    "UPDATE tasks SET status = 'processing', started_at = ?2 \
                     WHERE task_id = ?1 AND status = 'pending'",
                    rusqlite::params![id, now],
                )?;
                Ok::<_, tokio_rusqlite::Error>(n)
            })
            .await?;
        Ok(changed == 1)
    }

    /// Records the batch plan size and the file list under review.
    pub async fn set_plan(
        &self,
        task_id: Uuid,
        batch_total: usize,
        files_reviewed: &[String],
    ) -> StoreResult<()> {
        let id = task_id.to_string();
        let files = serde_json::to_string(files_reviewed)?;
        self.conn
            .call(move |db| {
                db.execute(
                    "UPDATE tasks SET batch_total = ?2, files_reviewed = ?3 WHERE task_id = ?1",
                    rusqlite::params![id, batch_total as i64, files],
                )?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Appends (or replaces) one batch result and advances `batch_current`.
    pub async fn update_progress(
        &self,
        task_id: Uuid,
        batch_index: usize,
        result: BatchResult,
    ) -> StoreResult<()> {
        let id = task_id.to_string();
        self.conn
            .call(move |db| {
                let raw: String = db.query_row(
                    "SELECT batch_results FROM tasks WHERE task_id = ?1",
                    [&id],
                    |row| row.get(0),
                )?;
                let mut results: Vec<BatchResult> =
                    serde_json::from_str(&raw).map_err(other_err)?;
                results.retain(|r| r.index != batch_index);
                results.push(result);
                results.sort_by_key(|r| r.index);
                let encoded = serde_json::to_string(&results).map_err(other_err)?;
                db.execute(
                    "UPDATE tasks SET batch_results = ?2, batch_current = ?3 WHERE task_id = ?1",
                    rusqlite::params![id, encoded, (batch_index + 1) as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Writes the terminal status, issues, summary fields and report in one
    /// transaction. Refuses to overwrite an already-terminal task.
    pub async fn finalize(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        issues: &[ReviewIssue],
        fields: SummaryFields,
        report: Option<String>,
    ) -> StoreResult<()> {
        debug_assert!(status.is_terminal());
        let id = task_id.to_string();
        let now = Utc::now();
        let issues = issues.to_vec();
        let summary_json = fields
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let outcome = self
            .conn
            .call(move |db| {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let current: Option<(String, Option<i64>)> = tx
                    .query_row(
                        "SELECT status, started_at FROM tasks WHERE task_id = ?1",
                        [&id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                let (current_status, started_at) = match current {
                    Some(v) => v,
                    None => return Ok(FinalizeOutcome::NotFound),
                };
                let parsed = TaskStatus::parse(&current_status)
                    .ok_or_else(|| bad_col(0, format!("invalid status: {current_status}")))?;
                if parsed.is_terminal() {
                    return Ok(FinalizeOutcome::AlreadyTerminal(current_status));
                }

                let finished = dt_to_ts(&now);
                let elapsed = started_at.map(|s| (finished - s).max(0) as f64);
                tx.execute(
                    "UPDATE tasks SET status = ?2, issues_count = ?3, critical_count = ?4, \
                     warning_count = ?5, suggestion_count = ?6, quality_score = ?7, \
                     summary = ?8, error_message = ?9, report = ?10, finished_at = ?11, \
                     processing_time_seconds = ?12 \
                     WHERE task_id = ?1",
                    rusqlite::params![
                        id,
                        status.as_str(),
                        fields.issues_count as i64,
                        fields.critical_count as i64,
                        fields.warning_count as i64,
                        fields.suggestion_count as i64,
                        fields.quality_score.map(|v| v as i64),
                        summary_json,
                        fields.error_message,
                        report,
                        finished,
                        elapsed,
                    ],
                )?;

                tx.execute("DELETE FROM issues WHERE task_id = ?1", [&id])?;
                for (ord, issue) in issues.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO issues (task_id, ord, severity, title, description, \
                         file_path, line_number, code_snippet, suggestion, category) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        rusqlite::params![
                            id,
                            ord as i64,
                            issue.severity.as_str(),
                            issue.title,
                            issue.description,
                            issue.file_path,
                            issue.line_number.map(|n| n as i64),
                            issue.code_snippet,
                            issue.suggestion,
                            issue.category,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok::<_, tokio_rusqlite::Error>(FinalizeOutcome::Done)
            })
            .await?;

        match outcome {
            FinalizeOutcome::Done => Ok(()),
            FinalizeOutcome::NotFound => Err(StoreError::TaskNotFound(task_id)),
            FinalizeOutcome::AlreadyTerminal(status) => {
                Err(StoreError::TerminalTask { task_id, status })
            }
        }
    }

    /// Current status only; used by the scheduler before picking up a task.
    pub async fn status(&self, task_id: Uuid) -> StoreResult<TaskStatus> {
        let id = task_id.to_string();
        let raw = self
            .conn
            .call(move |db| {
                let s: String = db.query_row(
                    "SELECT status FROM tasks WHERE task_id = ?1",
                    [&id],
                    |row| row.get(0),
                )?;
                Ok::<_, tokio_rusqlite::Error>(s)
            })
            .await
            .map_err(|e| map_no_rows(e, task_id))?;
        TaskStatus::parse(&raw).ok_or_else(|| {
            StoreError::Db(tokio_rusqlite::Error::Rusqlite(bad_col(
                0,
                format!("invalid status: {raw}"),
            )))
        })
    }

    pub async fn get(&self, task_id: Uuid) -> StoreResult<ReviewTask> {
        let id = task_id.to_string();
        self.conn
            .call(move |db| {
                let task = db.query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                    [&id],
                    map_task_row,
                )?;
                Ok::<_, tokio_rusqlite::Error>(task)
            })
            .await
            .map_err(|e| map_no_rows(e, task_id))
    }

    /// Task plus its persisted issues, in report order.
    pub async fn get_full(&self, task_id: Uuid) -> StoreResult<(ReviewTask, Vec<ReviewIssue>)> {
        let task = self.get(task_id).await?;
        let id = task_id.to_string();
        let issues = self
            .conn
            .call(move |db| {
                let mut stmt = db.prepare(
                    "SELECT severity, title, description, file_path, line_number, \
                     code_snippet, suggestion, category \
                     FROM issues WHERE task_id = ?1 ORDER BY ord",
                )?;
                let rows = stmt.query_map([&id], map_issue_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await?;
        Ok((task, issues))
    }

    /// Filtered, sorted, paginated listing.
    pub async fn query(&self, filter: TaskFilter) -> StoreResult<Vec<ReviewTask>> {
        let (where_sql, params) = build_filter(&filter);
        let order = if filter.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {where_sql} \
             ORDER BY {} {order} LIMIT ?{} OFFSET ?{}",
            filter.sort_by.column(),
            params.len() + 1,
            params.len() + 2,
        );
        let limit = filter.limit.max(1) as i64;
        let offset = filter.offset as i64;
        self.conn
            .call(move |db| {
                let mut stmt = db.prepare(&sql)?;
                let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = params
                    .into_iter()
                    .map(|p| Box::new(p) as Box<dyn rusqlite::types::ToSql>)
                    .collect();
                bound.push(Box::new(limit));
                bound.push(Box::new(offset));
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(bound.iter().map(|b| b.as_ref())),
                    map_task_row,
                )?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }

    /// Deletes a task and (via cascade) its issues. Returns `false` if absent.
    pub async fn delete(&self, task_id: Uuid) -> StoreResult<bool> {
        let id = task_id.to_string();
        let n = self
            .conn
            .call(move |db| {
                let n = db.execute("DELETE FROM tasks WHERE task_id = ?1", [&id])?;
                Ok::<_, tokio_rusqlite::Error>(n)
            })
            .await?;
        Ok(n == 1)
    }

    /// Startup recovery: tasks left `processing` by a previous run are marked
    /// failed (the engine never resumes in-flight batches); returns pending
    /// task ids in `created_at` order for re-enqueue.
    pub async fn recover_interrupted(&self) -> StoreResult<Vec<Uuid>> {
        let aborted = self
            .conn
            .call(|db| {
                let now = dt_to_ts(&Utc::now());
                let n = db.execute(
                    "UPDATE tasks SET status = 'failed', \
                     error_message = 'aborted by restart', finished_at = ?1 \
                     WHERE status = 'processing'",
                    [now],
                )?;
                Ok::<_, tokio_rusqlite::Error>(n)
            })
            .await?;
        if aborted > 0 {
            warn!(count = aborted, "marked interrupted tasks as failed");
        }

        let ids = self
            .conn
            .call(|db| {
                let mut stmt = db.prepare(
                    "SELECT task_id FROM tasks WHERE status = 'pending' ORDER BY created_at",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await?;

        Ok(ids
            .into_iter()
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect())
    }
}

enum FinalizeOutcome {
    Done,
    NotFound,
    AlreadyTerminal(String),
}

fn is_unique_violation(e: &tokio_rusqlite::Error) -> bool {
    matches!(
        e,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn map_no_rows(e: tokio_rusqlite::Error, task_id: Uuid) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows) => {
            StoreError::TaskNotFound(task_id)
        }
        other => StoreError::Db(other),
    }
}

fn build_filter(filter: &TaskFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(status) = filter.status {
        params.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", params.len()));
    }
    if let Some(strategy) = filter.strategy {
        params.push(strategy.as_str().to_string());
        clauses.push(format!("strategy = ?{}", params.len()));
    }
    if let Some(repo) = &filter.repo_id {
        params.push(repo.clone());
        clauses.push(format!("repo_id = ?{}", params.len()));
    }
    if let Some(author) = &filter.author {
        params.push(author.clone());
        clauses.push(format!("author_name = ?{}", params.len()));
    }
    if let Some(search) = &filter.search {
        params.push(format!("%{search}%"));
        let n = params.len();
        clauses.push(format!(
            "(project_name LIKE ?{n} OR branch LIKE ?{n} OR revision_ref LIKE ?{n})"
        ));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

pub(crate) fn map_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewTask> {
    let task_id: String = row.get(0)?;
    let strategy: String = row.get(3)?;
    let status: String = row.get(9)?;
    let batch_results: String = row.get(12)?;
    let files_reviewed: String = row.get(18)?;
    let summary: Option<String> = row.get(20)?;
    let poll_kind: Option<String> = row.get(22)?;

    Ok(ReviewTask {
        task_id: Uuid::parse_str(&task_id)
            .map_err(|e| bad_col(0, format!("invalid task_id: {e}")))?,
        repo_id: row.get(1)?,
        project_name: row.get(2)?,
        strategy: ReviewStrategy::parse(&strategy)
            .ok_or_else(|| bad_col(3, format!("invalid strategy: {strategy}")))?,
        revision_ref: row.get(4)?,
        base_ref: row.get(5)?,
        branch: row.get(6)?,
        author_name: row.get(7)?,
        author_email: row.get(8)?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| bad_col(9, format!("invalid status: {status}")))?,
        batch_total: row.get::<_, i64>(10)? as usize,
        batch_current: row.get::<_, i64>(11)? as usize,
        batch_results: serde_json::from_str(&batch_results)
            .map_err(|e| bad_col(12, format!("invalid batch_results: {e}")))?,
        issues_count: row.get::<_, i64>(13)? as u32,
        critical_count: row.get::<_, i64>(14)? as u32,
        warning_count: row.get::<_, i64>(15)? as u32,
        suggestion_count: row.get::<_, i64>(16)? as u32,
        quality_score: row.get::<_, Option<i64>>(17)?.map(|v| v as u8),
        files_reviewed: serde_json::from_str(&files_reviewed)
            .map_err(|e| bad_col(18, format!("invalid files_reviewed: {e}")))?,
        report: row.get(19)?,
        summary: summary
            .map(|s| {
                serde_json::from_str::<ReviewSummary>(&s)
                    .map_err(|e| bad_col(20, format!("invalid summary: {e}")))
            })
            .transpose()?,
        error_message: row.get(21)?,
        poll_kind: poll_kind.and_then(|k| crate::models::RevisionKind::parse(&k)),
        marker_prev: row.get(23)?,
        created_at: ts_to_dt(row.get(24)?),
        started_at: row.get::<_, Option<i64>>(25)?.map(ts_to_dt),
        finished_at: row.get::<_, Option<i64>>(26)?.map(ts_to_dt),
        processing_time_seconds: row.get(27)?,
    })
}

fn map_issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewIssue> {
    let severity: String = row.get(0)?;
    Ok(ReviewIssue {
        severity: crate::models::IssueSeverity::parse(&severity)
            .ok_or_else(|| bad_col(0, format!("invalid severity: {severity}")))?,
        title: row.get(1)?,
        description: row.get(2)?,
        file_path: row.get(3)?,
        line_number: row.get::<_, Option<i64>>(4)?.map(|n| n as u32),
        code_snippet: row.get(5)?,
        suggestion: row.get(6)?,
        category: row.get(7)?,
    })
}
