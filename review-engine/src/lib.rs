//! Review orchestration engine: FIFO queue, bounded worker pool,
//! cancellation and shutdown.
//!
//! Tasks are persisted at enqueue time; the in-memory queue only carries
//! ids, so a restart re-enqueues whatever the store still reports pending
//! (in `created_at` order) and nothing is lost. Workers share one receiver
//! behind an async mutex; each dequeues, re-checks the task is still
//! pending, and drives the full pipeline in `worker.rs`.
//!
//! Cross-worker communication goes through the store or the queue; the only
//! shared mutable state here is the cancellation registry and the shutdown
//! flag, both behind their own locks.

pub mod comment;
pub mod errors;
pub mod poller;
pub mod prompts;
mod retry;
mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use git_workspace::WorkspaceManager;
use review_store::models::{NewTask, ReviewTask, TaskStatus};
use review_store::Store;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use errors::{EngineError, EngineResult};
pub use poller::{Poller, PollerStatus};

/// Static engine configuration from the environment; runtime-tunable knobs
/// (model endpoint, assistant settings) come from the settings store instead.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size `W`.
    pub worker_count: usize,
    /// Assistant binary name, resolved via PATH.
    pub assistant_bin: String,
    /// Default per-batch wall-clock timeout.
    pub batch_timeout: Duration,
    /// SIGTERM→SIGKILL window for assistant children.
    pub termination_grace: Duration,
    /// Grace given to in-flight tasks on shutdown before their subprocesses
    /// are terminated.
    pub shutdown_grace: Duration,
    pub max_tokens_per_batch: u64,
    pub context_map_tokens: u64,
    pub chars_per_token: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            assistant_bin: "aider".to_string(),
            batch_timeout: Duration::from_secs(1800),
            termination_grace: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
            max_tokens_per_batch: 100_000,
            context_map_tokens: 262_144,
            chars_per_token: 3.5,
        }
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Task was still queued; it is finalized as cancelled directly.
    CancelledPending,
    /// Task was running; its current batch subprocess is being terminated.
    CancellationSignalled,
}

pub struct ReviewEngine {
    pub(crate) store: Store,
    pub(crate) workspace: Arc<WorkspaceManager>,
    pub(crate) config: EngineConfig,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Uuid>>>,
    pub(crate) cancels: StdMutex<HashMap<Uuid, watch::Sender<bool>>>,
    shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    workers: StdMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ReviewEngine {
    pub fn new(store: Store, workspace: Arc<WorkspaceManager>, config: EngineConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            workspace,
            config,
            queue_tx,
            queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
            cancels: StdMutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            workers: StdMutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn workspace(&self) -> &Arc<WorkspaceManager> {
        &self.workspace
    }

    /// Startup recovery + worker spawn. Tasks left `processing` by a dead
    /// process become `failed ("aborted by restart")`; still-pending tasks
    /// re-enter the queue in creation order.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        let pending = self.store.tasks().recover_interrupted().await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "re-enqueueing pending tasks after restart");
        }
        for task_id in pending {
            let _ = self.queue_tx.send(task_id);
        }

        let mut workers = self.workers.lock().expect("worker handles");
        for n in 0..self.config.worker_count.max(1) {
            let engine = self.clone();
            workers.push(tokio::spawn(async move {
                engine.worker_loop(n).await;
            }));
        }
        info!(workers = self.config.worker_count.max(1), "review engine started");
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, n: usize) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let task_id = loop {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(id) => break id,
                        None => return,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!(worker = n, "worker stopping; no new dequeues");
                            return;
                        }
                    }
                }
            };
            if let Err(e) = self.execute_task(task_id).await {
                warn!(worker = n, %task_id, error = %e, "task execution error");
            }
        }
    }

    /// Creates and enqueues a task. [`EngineError::Duplicate`] when a
    /// non-terminal task already covers the same (repo, strategy, revision).
    pub async fn submit(&self, input: NewTask) -> EngineResult<ReviewTask> {
        if *self.shutdown_rx.borrow() {
            return Err(EngineError::ShuttingDown);
        }
        let task = self
            .store
            .tasks()
            .create(input)
            .await
            .map_err(EngineError::from_store)?;
        debug!(task_id = %task.task_id, repo_id = %task.repo_id, "task enqueued");
        let _ = self.queue_tx.send(task.task_id);
        Ok(task)
    }

    /// Operator cancellation.
    ///
    /// Pending tasks finalize as `cancelled` immediately (the queue entry is
    /// skipped at dequeue). Processing tasks get their cancel flag flipped:
    /// the current batch subprocess is terminated and the worker finalizes
    /// with completed batches retained.
    pub async fn cancel(&self, task_id: Uuid) -> EngineResult<CancelOutcome> {
        let status = self
            .store
            .tasks()
            .status(task_id)
            .await
            .map_err(EngineError::from_store)?;
        match status {
            TaskStatus::Pending => {
                self.store
                    .tasks()
                    .finalize(
                        task_id,
                        TaskStatus::Cancelled,
                        &[],
                        review_store::models::SummaryFields::default(),
                        None,
                    )
                    .await
                    .map_err(EngineError::from_store)?;
                info!(%task_id, "pending task cancelled");
                Ok(CancelOutcome::CancelledPending)
            }
            TaskStatus::Processing => {
                let signalled = {
                    let cancels = self.cancels.lock().expect("cancel registry");
                    match cancels.get(&task_id) {
                        Some(tx) => tx.send(true).is_ok(),
                        None => false,
                    }
                };
                if !signalled {
                    // Worker has not registered yet (or just finished);
                    // re-checking status lets racing callers see the truth.
                    warn!(%task_id, "processing task had no cancel channel");
                }
                info!(%task_id, "cancellation signalled");
                Ok(CancelOutcome::CancellationSignalled)
            }
            terminal => Err(EngineError::NotCancellable {
                task_id,
                status: terminal.as_str().to_string(),
            }),
        }
    }

    /// SIGTERM path: stop dequeues, give in-flight tasks the configured
    /// grace to finish their current batch, then terminate their
    /// subprocesses (tasks finalize as `failed ("shutdown")`).
    pub async fn shutdown(&self) {
        info!("engine shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            let active = self.cancels.lock().expect("cancel registry").len();
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "shutdown grace expired; terminating batch subprocesses");
                let cancels = self.cancels.lock().expect("cancel registry");
                for tx in cancels.values() {
                    let _ = tx.send(true);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let handles: Vec<_> = self
            .workers
            .lock()
            .expect("worker handles")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("engine stopped");
    }
}
