//! Persistent data model: repositories, tasks, issues, markers, settings.
//!
//! Enums carry stable string encodings (`as_str`/`parse`) used both in the
//! database and in JSON payloads, so the two representations never drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported Git platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitLab,
    Gitea,
    GitHub,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GitLab => "gitlab",
            Platform::Gitea => "gitea",
            Platform::GitHub => "github",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gitlab" => Some(Platform::GitLab),
            "gitea" => Some(Platform::Gitea),
            "github" => Some(Platform::GitHub),
            _ => None,
        }
    }
}

/// Per-repository authentication record used for clone/fetch and API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepoAuth {
    None,
    HttpBasic { user: String, password: String },
    Token { value: String },
}

impl RepoAuth {
    /// Token usable for platform API calls, if any.
    pub fn api_token(&self) -> Option<&str> {
        match self {
            RepoAuth::Token { value } => Some(value),
            _ => None,
        }
    }
}

/// How review tasks are discovered for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Webhook,
    Polling,
    Both,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Webhook => "webhook",
            TriggerMode::Polling => "polling",
            TriggerMode::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(TriggerMode::Webhook),
            "polling" => Some(TriggerMode::Polling),
            "both" => Some(TriggerMode::Both),
            _ => None,
        }
    }

    pub fn polls(&self) -> bool {
        matches!(self, TriggerMode::Polling | TriggerMode::Both)
    }

    pub fn accepts_webhooks(&self) -> bool {
        matches!(self, TriggerMode::Webhook | TriggerMode::Both)
    }
}

/// Lifecycle of the local mirror for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStatus {
    Absent,
    Cloning,
    Cloned,
    Failed,
}

impl CloneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStatus::Absent => "absent",
            CloneStatus::Cloning => "cloning",
            CloneStatus::Cloned => "cloned",
            CloneStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absent" => Some(CloneStatus::Absent),
            "cloning" => Some(CloneStatus::Cloning),
            "cloned" => Some(CloneStatus::Cloned),
            "failed" => Some(CloneStatus::Failed),
            _ => None,
        }
    }
}

/// A repository the engine watches and reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_id: String,
    pub name: String,
    pub clone_url: String,
    pub branch: String,
    pub platform: Platform,
    pub auth: RepoAuth,
    pub trigger_mode: TriggerMode,
    pub polling_interval_minutes: u32,
    /// Revisions authored before this instant are ignored by ingestion.
    pub effective_from: Option<DateTime<Utc>>,
    pub poll_commits: bool,
    pub poll_mrs: bool,
    pub enable_comment: bool,
    pub enabled: bool,
    /// Optional override for the mirror location.
    pub local_path: Option<String>,
    /// Secret for webhook signature verification; absent disables the check.
    pub webhook_secret: Option<String>,
    /// Per-repo platform API base; falls back to the global setting.
    pub api_base: Option<String>,
    pub clone_status: CloneStatus,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Review strategy: incremental commit review or cumulative MR review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStrategy {
    Commit,
    MergeRequest,
}

impl ReviewStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStrategy::Commit => "commit",
            ReviewStrategy::MergeRequest => "merge_request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(ReviewStrategy::Commit),
            "merge_request" => Some(ReviewStrategy::MergeRequest),
            _ => None,
        }
    }
}

/// Task lifecycle. Terminal statuses are write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Which kind of revision a marker tracks for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionKind {
    Commit,
    Mr,
}

impl RevisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionKind::Commit => "commit",
            RevisionKind::Mr => "mr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(RevisionKind::Commit),
            "mr" => Some(RevisionKind::Mr),
            _ => None,
        }
    }
}

/// Last fully-reviewed revision per (repo, branch, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMarker {
    pub last_seen_id: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Outcome of a single batch within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
    Cancelled,
}

/// Per-batch record kept on the task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub status: BatchStatus,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Issue severity as inferred from the assistant report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Suggestion,
    Info,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Critical => "critical",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Suggestion => "suggestion",
            IssueSeverity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(IssueSeverity::Critical),
            "warning" => Some(IssueSeverity::Warning),
            "suggestion" => Some(IssueSeverity::Suggestion),
            "info" => Some(IssueSeverity::Info),
            _ => None,
        }
    }
}

/// A single structured finding extracted from a review report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub code_snippet: Option<String>,
    pub suggestion: Option<String>,
    pub category: Option<String>,
}

/// Summary fields extracted from (or derived for) a finished review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub verdict: String,
    pub risk_level: RiskLevel,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// One end-to-end review attempt for a revision of a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTask {
    pub task_id: Uuid,
    pub repo_id: String,
    pub project_name: String,
    pub strategy: ReviewStrategy,
    /// Commit SHA or MR iid, depending on strategy.
    pub revision_ref: String,
    pub base_ref: Option<String>,
    pub branch: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub status: TaskStatus,
    pub batch_total: usize,
    pub batch_current: usize,
    pub batch_results: Vec<BatchResult>,
    pub issues_count: u32,
    pub critical_count: u32,
    pub warning_count: u32,
    pub suggestion_count: u32,
    pub quality_score: Option<u8>,
    pub files_reviewed: Vec<String>,
    pub report: Option<String>,
    pub summary: Option<ReviewSummary>,
    pub error_message: Option<String>,
    /// Set on poller-created tasks: which marker chain this task belongs to.
    pub poll_kind: Option<RevisionKind>,
    /// Marker value that must still be current for the post-finalize advance.
    pub marker_prev: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
}

/// Input for task creation; everything else is defaulted by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub repo_id: String,
    pub project_name: String,
    pub strategy: ReviewStrategy,
    pub revision_ref: String,
    pub base_ref: Option<String>,
    pub branch: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub poll_kind: Option<RevisionKind>,
    pub marker_prev: Option<String>,
}

/// Aggregate counters written at finalize time.
#[derive(Debug, Clone, Default)]
pub struct SummaryFields {
    pub issues_count: u32,
    pub critical_count: u32,
    pub warning_count: u32,
    pub suggestion_count: u32,
    pub quality_score: Option<u8>,
    pub summary: Option<ReviewSummary>,
    pub error_message: Option<String>,
}

/// Query filters for the review listing endpoints.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub strategy: Option<ReviewStrategy>,
    pub repo_id: Option<String>,
    pub author: Option<String>,
    /// Substring match over project name, branch and revision.
    pub search: Option<String>,
    pub sort_by: TaskSort,
    pub descending: bool,
    pub limit: u32,
    pub offset: u32,
}

/// Sortable columns for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    CreatedAt,
    QualityScore,
    IssuesCount,
    ProjectName,
    AuthorName,
}

impl TaskSort {
    /// Column name as used in ORDER BY; values are fixed, never user input.
    pub fn column(&self) -> &'static str {
        match self {
            TaskSort::CreatedAt => "created_at",
            TaskSort::QualityScore => "quality_score",
            TaskSort::IssuesCount => "issues_count",
            TaskSort::ProjectName => "project_name",
            TaskSort::AuthorName => "author_name",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_at" => Some(TaskSort::CreatedAt),
            "quality_score" => Some(TaskSort::QualityScore),
            "issues_count" => Some(TaskSort::IssuesCount),
            "project_name" => Some(TaskSort::ProjectName),
            "author_name" => Some(TaskSort::AuthorName),
            _ => None,
        }
    }
}
