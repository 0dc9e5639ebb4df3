//! Assistant subprocess lifecycle (one invocation per batch).
//!
//! The child gets a cleared environment rebuilt with only what this batch
//! needs: PATH/HOME plus the model endpoint credentials. Stdout is the
//! report; stderr goes to logs. A wall-clock timeout and an external cancel
//! signal both terminate the child the same way: SIGTERM, a grace window,
//! then SIGKILL. The process handle is scoped so the child cannot outlive
//! any exit path, panic included (`kill_on_drop`).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Assistant binary missing or not executable.
    #[error("failed to spawn assistant: {0}")]
    Spawn(#[source] std::io::Error),

    /// Batch exceeded its wall-clock budget and was terminated.
    #[error("timeout")]
    Timeout,

    /// Batch was cancelled by the operator or by shutdown.
    #[error("cancelled")]
    Cancelled,

    /// Assistant exited non-zero; the tail of stderr is attached.
    #[error("assistant exited with {code}: {stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },

    /// IO error while driving the child's pipes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything one batch invocation needs; assembled by the engine from the
/// task, the batch plan and the settings store.
#[derive(Debug, Clone)]
pub struct BatchInvocation {
    /// Assistant binary name, resolved via PATH.
    pub assistant_bin: String,
    /// Strategy-specific prompt preamble.
    pub prompt: String,
    /// Files of this batch, relative to the checkout.
    pub files: Vec<String>,
    /// Context-map token budget; `None` disables the repository map.
    pub map_tokens: Option<u64>,
    /// Model endpoint configuration, passed as child-only env entries.
    pub api_base: String,
    pub api_key: String,
    pub model_name: String,
    /// Wall-clock budget for the whole batch.
    pub timeout: Duration,
    /// How long to wait between SIGTERM and SIGKILL.
    pub grace: Duration,
}

/// Runs the assistant once in `checkout` and returns its stdout report.
///
/// `cancel` flips to `true` when the task is cancelled or the engine shuts
/// down; the child is then terminated and [`RunnerError::Cancelled`] is
/// returned. Previously captured output is discarded with it: a cancelled
/// batch produces no report.
pub async fn run_batch(
    checkout: &Path,
    invocation: &BatchInvocation,
    cancel: &mut watch::Receiver<bool>,
) -> RunnerResult<String> {
    let mut cmd = Command::new(&invocation.assistant_bin);
    cmd.current_dir(checkout)
        .arg("--no-auto-commits")
        .arg("--no-git")
        .arg("--yes")
        .arg("--no-pretty")
        .arg("--message")
        .arg(&invocation.prompt);
    match invocation.map_tokens {
        Some(tokens) => {
            cmd.arg("--map-tokens").arg(tokens.to_string());
        }
        None => {
            cmd.arg("--no-repo-map");
        }
    }
    cmd.args(&invocation.files);

    // Scoped environment: nothing from this process leaks except PATH/HOME,
    // plus the endpoint credentials this batch explicitly needs.
    cmd.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    if let Ok(home) = std::env::var("HOME") {
        cmd.env("HOME", home);
    }
    cmd.env("OPENAI_API_BASE", &invocation.api_base)
        .env("OPENAI_API_KEY", &invocation.api_key)
        .env("AIDER_MODEL", &invocation.model_name);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(RunnerError::Spawn)?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = tokio::time::sleep(invocation.timeout) => {
            warn!(timeout_secs = invocation.timeout.as_secs(), "assistant batch timed out");
            terminate(&mut child, invocation.grace).await;
            return Err(RunnerError::Timeout);
        }
        _ = async {
            loop {
                if cancel.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *cancel.borrow() {
                    break;
                }
            }
        } => {
            debug!("assistant batch cancelled; terminating child");
            terminate(&mut child, invocation.grace).await;
            return Err(RunnerError::Cancelled);
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let stderr_text = String::from_utf8_lossy(&stderr);
    if !stderr_text.trim().is_empty() {
        debug!(stderr = %tail(&stderr_text, 2000), "assistant stderr");
    }

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        return Err(RunnerError::NonZeroExit {
            code,
            stderr_tail: tail(&stderr_text, 500).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// SIGTERM, wait out the grace window, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(%pid, error = %e, "SIGTERM delivery failed");
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        warn!(%pid, "assistant ignored SIGTERM; killing");
    }
    let _ = child.kill().await;
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let start = text.len() - max;
    // Stay on a char boundary.
    let mut idx = start;
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    &text[idx..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable stub standing in for the assistant binary.
    fn stub_assistant(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("assistant-stub");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        f.flush().unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn invocation(bin: String, timeout: Duration) -> BatchInvocation {
        BatchInvocation {
            assistant_bin: bin,
            prompt: "review this".into(),
            files: vec!["a.rs".into()],
            map_tokens: None,
            api_base: "http://127.0.0.1:9/v1".into(),
            api_key: "test".into(),
            model_name: "test-model".into(),
            timeout,
            grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_scopes_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = stub_assistant(&dir, "echo \"base=$OPENAI_API_BASE model=$AIDER_MODEL\"\nenv");
        let (_tx, mut cancel) = watch::channel(false);
        let inv = invocation(bin, Duration::from_secs(5));
        let out = run_batch(dir.path(), &inv, &mut cancel).await.unwrap();
        assert!(out.contains("base=http://127.0.0.1:9/v1 model=test-model"));
        assert!(!out.contains("CARGO_MANIFEST_DIR="));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = stub_assistant(&dir, "echo 'model unreachable' >&2\nexit 3");
        let (_tx, mut cancel) = watch::channel(false);
        let inv = invocation(bin, Duration::from_secs(5));
        let err = run_batch(dir.path(), &inv, &mut cancel).await.unwrap_err();
        match err {
            RunnerError::NonZeroExit { code, stderr_tail } => {
                assert_eq!(code, 3);
                assert!(stderr_tail.contains("model unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_tx, mut cancel) = watch::channel(false);
        let inv = invocation("definitely-not-a-real-binary-9f2".into(), Duration::from_secs(1));
        let err = run_batch(dir.path(), &inv, &mut cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn(_)));
    }

    #[tokio::test]
    async fn timeout_terminates_the_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = stub_assistant(&dir, "sleep 30");
        let (_tx, mut cancel) = watch::channel(false);
        let inv = invocation(bin, Duration::from_millis(300));
        let started = std::time::Instant::now();
        let err = run_batch(dir.path(), &inv, &mut cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_batch() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = stub_assistant(&dir, "sleep 30");
        let (tx, mut cancel) = watch::channel(false);
        let inv = invocation(bin, Duration::from_secs(30));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });
        let started = std::time::Instant::now();
        let err = run_batch(dir.path(), &inv, &mut cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "αβγδε";
        let t = tail(text, 3);
        assert!(text.ends_with(t));
        assert!(t.len() <= 4);
    }
}
