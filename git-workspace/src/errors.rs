//! Error type for workspace/VCS operations.
//!
//! Git failures are classified by stderr text so callers can retry the
//! transient ones (network, remote hiccups) and fail fast on the rest.

use thiserror::Error;

pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug, Error)]
pub enum GitError {
    /// Failed to spawn the host `git` binary (missing from PATH, IO error).
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    /// `git` exited non-zero for a reason that retrying will not fix.
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// Network-shaped failure (DNS, connect, reset, remote hung up).
    #[error("git {command} network error: {stderr}")]
    Network { command: String, stderr: String },

    /// Authentication rejected by the remote.
    #[error("git {command} authentication failed")]
    Auth { command: String },

    /// Produced output was not valid UTF-8 where text was expected.
    #[error("git produced non-utf8 output for {command}")]
    BadOutput { command: String },

    /// Clone URL could not be parsed for credential injection.
    #[error("invalid clone url")]
    BadUrl,

    /// Filesystem error around the mirror directory.
    #[error("workspace io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Whether the operation is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::Network { .. })
    }

    /// Classifies a non-zero git exit by its stderr text.
    pub(crate) fn from_exit(command: String, stderr: String) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("authentication failed")
            || lower.contains("401")
            || lower.contains("access denied")
            || lower.contains("permission denied")
        {
            return GitError::Auth { command };
        }
        if lower.contains("could not resolve host")
            || lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("early eof")
            || lower.contains("remote hung up")
            || lower.contains("unable to access")
        {
            return GitError::Network { command, stderr };
        }
        GitError::Command { command, stderr }
    }
}
