//! Thin asynchronous wrapper over the host `git` binary.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::{GitError, GitResult};

/// Runs `git <args>` in `dir` (or the process cwd) and returns stdout.
///
/// `secret` is scrubbed from the recorded command line and stderr before
/// either can surface in an error, so authenticated URLs never leak.
pub(crate) async fn run_git(
    dir: Option<&Path>,
    args: &[&str],
    secret: Option<&str>,
) -> GitResult<String> {
    let cmd_display = scrub(&args.join(" "), secret);
    trace!(command = %cmd_display, "running git");

    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(GitError::Spawn)?;
    if !output.status.success() {
        let stderr = scrub(&String::from_utf8_lossy(&output.stderr), secret);
        debug!(command = %cmd_display, %stderr, "git exited non-zero");
        return Err(GitError::from_exit(cmd_display, stderr.trim().to_string()));
    }

    String::from_utf8(output.stdout).map_err(|_| GitError::BadOutput { command: cmd_display })
}

/// Like [`run_git`] but returns raw bytes; used for `git show` on file blobs.
pub(crate) async fn run_git_bytes(dir: &Path, args: &[&str]) -> GitResult<Option<Vec<u8>>> {
    let display = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(GitError::Spawn)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        // Path or ref not present at that revision.
        if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") {
            return Ok(None);
        }
        return Err(GitError::from_exit(display, stderr.trim().to_string()));
    }
    Ok(Some(output.stdout))
}

fn scrub(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() => text.replace(s, "<redacted>"),
        _ => text.to_string(),
    }
}
