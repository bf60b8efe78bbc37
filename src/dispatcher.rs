//! Fixed worker pool over one bounded task queue.
//!
//! The request handler enqueues a [`RequestTask`] and waits on its
//! [`PendingReply`]; whichever worker is free first runs it through the
//! [`TaskExecutor`] and answers on the task's one-shot channel.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::error::ProxyError;

pub type TaskResult = Result<String, ProxyError>;

/// One prompt to send upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub request_id: Uuid,
    pub prompt: String,
    pub system_prompt: String,
    pub model: String,
    pub web_search: bool,
}

/// Runs jobs on behalf of the workers.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, job: Job, deadline: Instant) -> BoxFuture<'static, TaskResult>;
}

/// A job plus everything a worker needs to answer it.
pub struct RequestTask {
    pub job: Job,
    pub deadline: Instant,
    cancel: CancellationToken,
    reply: oneshot::Sender<TaskResult>,
}

/// Requester side of a task.
///
/// Dropping it, including when the wait times out, cancels the task's
/// upstream work.
pub struct PendingReply {
    rx: oneshot::Receiver<TaskResult>,
    _cancel_on_drop: DropGuard,
}

impl RequestTask {
    pub fn new(job: Job, deadline: Instant) -> (Self, PendingReply) {
        let (reply, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let pending = PendingReply {
            rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
        };
        (
            Self {
                job,
                deadline,
                cancel,
                reply,
            },
            pending,
        )
    }

    fn is_abandoned(&self) -> bool {
        self.reply.is_closed() || self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }
}

impl PendingReply {
    /// Wait for the worker's answer until `deadline`.
    pub async fn wait(self, deadline: Instant) -> TaskResult {
        match tokio::time::timeout_at(deadline, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProxyError::Internal("task dropped without a reply".to_string())),
            Err(_) => Err(ProxyError::Timeout),
        }
    }
}

/// Producer handle for the task queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<RequestTask>,
}

impl TaskQueue {
    /// Enqueue `task`, waiting at most `wait` for a free slot.
    ///
    /// A zero wait fails immediately when the queue is full.
    pub async fn enqueue(&self, task: RequestTask, wait: Duration) -> Result<(), ProxyError> {
        if wait.is_zero() {
            return self.tx.try_send(task).map_err(|e| match e {
                TrySendError::Full(_) => ProxyError::QueueSaturated,
                TrySendError::Closed(_) => dispatcher_stopped(),
            });
        }

        self.tx.send_timeout(task, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => ProxyError::QueueSaturated,
            SendTimeoutError::Closed(_) => dispatcher_stopped(),
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

fn dispatcher_stopped() -> ProxyError {
    ProxyError::Internal("dispatcher is not running".to_string())
}

/// Consumer side, turned into workers by [`Dispatcher::start`].
pub struct Dispatcher {
    rx: mpsc::Receiver<RequestTask>,
    worker_count: usize,
}

/// Create the queue (capacity `queue_size`) and an unstarted pool of
/// `worker_count` workers.
pub fn build_dispatcher(worker_count: usize, queue_size: usize) -> (TaskQueue, Dispatcher) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    (
        TaskQueue { tx },
        Dispatcher {
            rx,
            worker_count: worker_count.max(1),
        },
    )
}

impl Dispatcher {
    /// Spawn the workers. They exit once every [`TaskQueue`] is dropped and
    /// the queue has drained.
    pub fn start(self, executor: Arc<dyn TaskExecutor>) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.worker_count, "starting dispatcher");
        let rx = Arc::new(Mutex::new(self.rx));

        (0..self.worker_count)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, rx.clone(), executor.clone())))
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<RequestTask>>>,
    executor: Arc<dyn TaskExecutor>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(task) = next else {
            tracing::debug!(worker_id, "task queue closed, worker exiting");
            return;
        };
        run_task(worker_id, task, &executor).await;
    }
}

async fn run_task(worker_id: usize, task: RequestTask, executor: &Arc<dyn TaskExecutor>) {
    let request_id = task.job.request_id;
    if task.is_abandoned() {
        tracing::debug!(worker_id, %request_id, "skipping abandoned task");
        return;
    }

    let RequestTask {
        job,
        deadline,
        cancel,
        reply,
    } = task;

    // Run in a separate task so a panic stays inside this one request.
    let executor = Arc::clone(executor);
    let handle = tokio::spawn(async move {
        let work = executor.execute(job, deadline);
        tokio::select! {
            _ = cancel.cancelled() => Err(ProxyError::Timeout),
            result = work => result,
        }
    });

    let result = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            tracing::error!(worker_id, %request_id, "task panicked");
            Err(ProxyError::Internal("task panicked".to_string()))
        }
        Err(e) => Err(ProxyError::Internal(e.to_string())),
    };

    if reply.send(result).is_err() {
        tracing::debug!(worker_id, %request_id, "requester gone, dropping result");
    }
}
