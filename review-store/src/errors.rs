//! Store-wide error hierarchy.
//!
//! Single root `StoreError` for all public store operations, with `From`
//! impls so `?` works across the sqlite boundary.

use thiserror::Error;
use uuid::Uuid;

/// Convenient alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Root error type for the review-store crate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sqlite failure (connection, statement, constraint).
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),

    /// JSON column encode/decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A non-terminal task already exists for the same (repo, strategy, revision).
    #[error("duplicate task for repo {repo_id} ({strategy} {revision_ref})")]
    DuplicateTask {
        repo_id: String,
        strategy: String,
        revision_ref: String,
    },

    /// Task id is unknown.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Repository id is unknown.
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    /// Attempt to mutate a task that already reached a terminal status.
    #[error("task {task_id} is terminal ({status}); refusing update")]
    TerminalTask { task_id: Uuid, status: String },

    /// Database was produced by a newer build; refuse to start.
    #[error("database schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(tokio_rusqlite::Error::Rusqlite(e))
    }
}
