//! Background task queue.
//!
//! Submission pushes onto an unbounded channel and returns at once. A
//! dispatcher pulls tasks in FIFO order and runs at most `concurrency` of
//! them at a time; completion order across workers is not guaranteed.
//! Task errors and panics end up in the log and never reach the submitter.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ratecache_common::{RateCacheError, Result, TaskId, Timestamp};

use crate::metrics::CacheMetrics;

/// Default number of tasks processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Work executed outside the request path.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundTask {
    /// Fetch the latest rates and persist them as a new snapshot.
    Refresh,
    /// Append an access record to the audit log.
    LogAccess {
        source_address: Option<String>,
        observed_at: Option<Timestamp>,
    },
}

impl BackgroundTask {
    /// Access log task for a known caller and time.
    pub fn log_access(source_address: impl Into<String>, observed_at: Timestamp) -> Self {
        BackgroundTask::LogAccess {
            source_address: Some(source_address.into()),
            observed_at: Some(observed_at),
        }
    }

    /// Task kind as it appears in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackgroundTask::Refresh => "REFRESH",
            BackgroundTask::LogAccess { .. } => "LOG_ACCESS",
        }
    }
}

/// Executes dequeued tasks.
///
/// An `Err` here is routed to the log only; it never propagates to
/// whoever enqueued the task.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: BackgroundTask) -> Result<()>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum tasks running at once.
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

struct QueuedTask {
    id: TaskId,
    task: BackgroundTask,
    completion: Option<oneshot::Sender<Result<()>>>,
}

/// Resolves once a submitted task has been processed.
#[derive(Debug)]
pub struct TaskReceipt {
    id: Option<TaskId>,
    rx: Option<oneshot::Receiver<Result<()>>>,
}

impl TaskReceipt {
    /// ID of the accepted task, or `None` if the queue refused it.
    pub fn task_id(&self) -> Option<TaskId> {
        self.id
    }

    /// Wait for the task's outcome.
    pub async fn wait(self) -> Result<()> {
        let rx = self
            .rx
            .ok_or_else(|| RateCacheError::internal_msg("task was not accepted by the queue"))?;
        rx.await.unwrap_or_else(|_| {
            Err(RateCacheError::internal_msg(
                "task was dropped before completion",
            ))
        })
    }
}

/// Submission side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    metrics: Arc<CacheMetrics>,
}

impl BackgroundQueue {
    /// Start the dispatcher and return the submission handle together with
    /// the worker handle used to shut it down.
    pub fn start(
        handler: Arc<dyn TaskHandler>,
        config: QueueConfig,
        metrics: Arc<CacheMetrics>,
    ) -> (Self, QueueWorker) {
        let concurrency = config.concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            handler,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            metrics: metrics.clone(),
        };
        let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));

        info!(concurrency, "Background queue started");

        (
            Self { tx, metrics },
            QueueWorker {
                shutdown_tx,
                handle,
            },
        )
    }

    /// Push a task and forget it.
    ///
    /// A refused push is logged and swallowed.
    pub fn enqueue(&self, task: BackgroundTask) {
        self.push(task, None);
    }

    /// Push a task and get a receipt for its outcome.
    pub fn submit(&self, task: BackgroundTask) -> TaskReceipt {
        let (tx, rx) = oneshot::channel();
        match self.push(task, Some(tx)) {
            Some(id) => TaskReceipt {
                id: Some(id),
                rx: Some(rx),
            },
            None => TaskReceipt { id: None, rx: None },
        }
    }

    fn push(
        &self,
        task: BackgroundTask,
        completion: Option<oneshot::Sender<Result<()>>>,
    ) -> Option<TaskId> {
        let id = TaskId::new();
        let kind = task.kind();

        match self.tx.send(QueuedTask {
            id,
            task,
            completion,
        }) {
            Ok(()) => {
                self.metrics.task_enqueued();
                debug!(task_id = %id, kind, "Task added to queue");
                Some(id)
            }
            Err(_) => {
                self.metrics.enqueue_failed();
                error!(task_id = %id, kind, "Failed to add task to queue: queue is shut down");
                None
            }
        }
    }
}

/// Owns the dispatcher task.
pub struct QueueWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl QueueWorker {
    /// Stop accepting tasks, finish what is buffered and running, then
    /// return.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Background queue dispatcher terminated abnormally");
        }
        info!("Background queue stopped");
    }
}

struct Dispatcher {
    handler: Arc<dyn TaskHandler>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    metrics: Arc<CacheMetrics>,
}

impl Dispatcher {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<QueuedTask>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                next = rx.recv() => match next {
                    Some(queued) => self.dispatch(queued).await,
                    None => break,
                },
            }
        }

        // Refuse new pushes, drain what was already accepted.
        rx.close();
        while let Some(queued) = rx.recv().await {
            self.dispatch(queued).await;
        }

        let _ = self.permits.acquire_many(self.concurrency as u32).await;
    }

    async fn dispatch(&self, queued: QueuedTask) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let handler = self.handler.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let QueuedTask {
                id,
                task,
                completion,
            } = queued;
            let kind = task.kind();

            let outcome = match tokio::spawn(async move { handler.handle(task).await }).await {
                Ok(result) => result,
                Err(e) => Err(RateCacheError::internal("background task panicked", e)),
            };

            record_outcome(&metrics, id, kind, &outcome);

            if let Some(completion) = completion {
                let _ = completion.send(outcome);
            }
        });
    }
}

fn record_outcome(metrics: &CacheMetrics, id: TaskId, kind: &'static str, outcome: &Result<()>) {
    match outcome {
        Ok(()) => {
            metrics.task_finished(true);
            debug!(task_id = %id, kind, "Background task completed");
        }
        Err(e) => {
            metrics.task_finished(false);
            error!(
                task_id = %id,
                kind,
                error_code = e.error_code(),
                error = %e.chain(),
                "Error processing background task"
            );
        }
    }
}

/// Resolves once shutdown is requested. If the worker handle is dropped
/// without a shutdown the queue keeps running for the life of the process.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            warn!("Queue worker handle dropped; dispatcher runs until process exit");
            std::future::pending::<()>().await;
        }
    }
}
