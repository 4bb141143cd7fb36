//! The polling worker pool: fixed-tick dequeue, timeout-bounded task
//! execution, and graceful drain on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rae_domain::error::Error;

use crate::model::QueueStatus;
use crate::repository::QueueRepository;

/// Executes one dequeued unit of work. Implemented by the response
/// service so the queue crate never depends on it.
#[async_trait::async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, public_id: &str, payload: serde_json::Value) -> Result<(), Error>;

    /// Called once a task's retry budget is exhausted and its queue entry
    /// has reached the terminal `failed` status (spec's "else set
    /// status=failed, persist last_error, and emit webhook"). Default is
    /// a no-op; implementations that need to notify on give-up override it.
    async fn on_exhausted(&self, _public_id: &str, _last_error: &str) {}
}

pub struct WorkerPoolConfig {
    pub worker_count: u32,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub shutdown_drain: Duration,
}

/// Spawn `worker_count` polling loops, returning their join handles. Call
/// `cancel.cancel()` then await the handles (with a drain timeout) to shut
/// down cleanly.
pub fn spawn_worker_pool(
    repo: Arc<QueueRepository>,
    runner: Arc<dyn TaskRunner>,
    config: WorkerPoolConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..config.worker_count)
        .map(|i| {
            let repo = repo.clone();
            let runner = runner.clone();
            let cancel = cancel.clone();
            let worker_id = format!("worker-{i}");
            let poll_interval = config.poll_interval;
            let task_timeout = config.task_timeout;
            tokio::spawn(async move {
                worker_loop(repo, runner, worker_id, poll_interval, task_timeout, cancel).await;
            })
        })
        .collect()
}

async fn worker_loop(
    repo: Arc<QueueRepository>,
    runner: Arc<dyn TaskRunner>,
    worker_id: String,
    poll_interval: Duration,
    task_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            tracing::info!(worker_id, "worker stopping: shutdown requested");
            return;
        }

        let dequeued = tokio::select! {
            result = repo.dequeue(&worker_id, task_timeout) => result,
            _ = cancel.cancelled() => {
                tracing::info!(worker_id, "worker stopping mid-poll: shutdown requested");
                return;
            }
        };

        let entry = match dequeued {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "dequeue failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let span = tracing::info_span!("queue_task", worker_id = %worker_id, public_id = %entry.public_id);
        let _guard = span.enter();

        match tokio::time::timeout(task_timeout, runner.run(&entry.public_id, entry.payload.clone())).await {
            Ok(Ok(())) => {
                if let Err(e) = repo.mark_done(&entry.public_id).await {
                    tracing::error!(public_id = %entry.public_id, error = %e, "mark_done failed");
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(public_id = %entry.public_id, error = %e, "task execution failed");
                let message = e.to_string();
                match repo.mark_failed(&entry.public_id, &message).await {
                    Ok(updated) if updated.status() == QueueStatus::Failed => {
                        runner.on_exhausted(&entry.public_id, &message).await;
                    }
                    Ok(_) => {}
                    Err(mark_err) => {
                        tracing::error!(public_id = %entry.public_id, error = %mark_err, "mark_failed failed");
                    }
                }
            }
            Err(_) => {
                let message = format!("task execution exceeded timeout of {task_timeout:?}");
                tracing::warn!(public_id = %entry.public_id, "task execution timed out");
                match repo.mark_failed(&entry.public_id, &message).await {
                    Ok(updated) if updated.status() == QueueStatus::Failed => {
                        runner.on_exhausted(&entry.public_id, &message).await;
                    }
                    Ok(_) => {}
                    Err(mark_err) => {
                        tracing::error!(public_id = %entry.public_id, error = %mark_err, "mark_failed failed");
                    }
                }
            }
        }
    }
}

/// Run the reaper on a fixed tick until cancelled.
pub async fn run_reaper(repo: Arc<QueueRepository>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                tracing::info!("reaper stopping: shutdown requested");
                return;
            }
        }

        match repo.reap_expired_leases().await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(reaped = n, "reaped expired leases"),
            Err(e) => tracing::error!(error = %e, "reaper tick failed"),
        }
    }
}

/// Request shutdown and wait up to `drain` for all workers to finish their
/// current task, then return regardless (callers that need a hard stop
/// simply drop the handles).
pub async fn shutdown(handles: Vec<JoinHandle<()>>, cancel: CancellationToken, drain: Duration) {
    cancel.cancel();
    let joined = futures_util::future::join_all(handles.into_iter().map(|h| async move { let _ = h.await; }));
    if tokio::time::timeout(drain, joined).await.is_err() {
        tracing::warn!("worker pool did not drain within {drain:?}, forcing shutdown");
    }
}
