//! Engine error hierarchy, unifying the crates the pipeline drives.

use review_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workspace(#[from] git_workspace::errors::GitError),

    #[error(transparent)]
    Platform(#[from] git_platform::PlatformError),

    /// A non-terminal task already covers this (repo, strategy, revision).
    #[error("duplicate task")]
    Duplicate,

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Cancel requested for a task already in a terminal state.
    #[error("task {task_id} is already {status}")]
    NotCancellable { task_id: Uuid, status: String },

    /// The engine is shutting down; no new work is accepted.
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    pub(crate) fn from_store(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateTask { .. } => EngineError::Duplicate,
            StoreError::TaskNotFound(id) => EngineError::TaskNotFound(id),
            other => EngineError::Store(other),
        }
    }
}
