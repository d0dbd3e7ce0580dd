//! Background task queue for detached work.
//!
//! Webhook deliveries, server teardown and demo capture run here so they
//! outlive the request that scheduled them. Jobs go through a bounded
//! channel to a fixed pool of workers. Scheduling never waits: when the
//! channel is full the job is dropped, logged and counted as rejected. A
//! failed or panicking job is logged and counted; nothing is reported back
//! to the scheduler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::config::TaskConfig;
use crate::error::GatewayError;

type JobFuture = Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send>>;

struct Job {
    name: &'static str,
    future: JobFuture,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TaskStats {
    /// Jobs accepted and not yet finished.
    pub pending: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Jobs that returned an error or panicked.
    pub failed: u64,
    /// Jobs dropped because the queue was full.
    pub rejected: u64,
}

/// Bounded queue drained by a fixed pool of workers.
#[derive(Debug)]
pub struct TaskQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl TaskQueue {
    /// Starts `config.workers` workers on the current runtime.
    #[must_use]
    pub fn start(config: &TaskConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                tokio::spawn(run_worker(worker, rx, counters))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Schedules `future` to run in the background.
    ///
    /// Returns immediately; a full queue rejects the job instead of making
    /// the caller wait for a worker.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] when the queue is full or after
    /// [`TaskQueue::shutdown`].
    pub async fn spawn<F>(&self, name: &'static str, future: F) -> Result<(), GatewayError>
    where
        F: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| GatewayError::Internal("task queue is shut down".to_string()))?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            name,
            future: Box::pin(future),
        };
        match sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(task = name, "task queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = name, "task queue full, job rejected");
                Err(GatewayError::Internal("task queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                Err(GatewayError::Internal("task queue is shut down".to_string()))
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        let queued = self.counters.queued.load(Ordering::Relaxed);
        let completed = self.counters.completed.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        TaskStats {
            pending: queued.saturating_sub(completed + failed),
            completed,
            failed,
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting jobs and waits until every queued job has run.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
        let stats = self.stats();
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            rejected = stats.rejected,
            "task queue drained"
        );
    }
}

async fn run_worker(worker: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, counters: Arc<Counters>) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        match tokio::spawn(job.future).await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker, task = job.name, error = %e, "background task failed");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker, task = job.name, error = %e, "background task panicked");
            }
        }
    }
    tracing::debug!(worker, "task worker stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn queue() -> TaskQueue {
        TaskQueue::start(&TaskConfig {
            workers: 2,
            queue_capacity: 8,
        })
    }

    #[tokio::test]
    async fn jobs_run_and_are_counted() {
        let tasks = queue();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let hits = Arc::clone(&hits);
            let queued = tasks
                .spawn("count", async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(queued.is_ok());
        }
        let failing = tasks
            .spawn("fail", async { Err(GatewayError::Internal("boom".to_string())) })
            .await;
        assert!(failing.is_ok());

        tasks.shutdown().await;
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(
            tasks.stats(),
            TaskStats {
                pending: 0,
                completed: 5,
                failed: 1,
                rejected: 0,
            }
        );
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let tasks = TaskQueue::start(&TaskConfig {
            workers: 1,
            queue_capacity: 1,
        });
        let gate = Arc::new(tokio::sync::Notify::new());
        let blocker = |gate: Arc<tokio::sync::Notify>| async move {
            gate.notified().await;
            Ok(())
        };

        // One job occupies the worker, the next fills the only slot.
        assert!(tasks.spawn("busy", blocker(Arc::clone(&gate))).await.is_ok());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(tasks.spawn("queued", blocker(Arc::clone(&gate))).await.is_ok());

        let overflow = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            tasks.spawn("overflow", async { Ok(()) }),
        )
        .await;
        let Ok(result) = overflow else {
            panic!("spawn must not wait for a worker");
        };
        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert_eq!(tasks.stats().rejected, 1);

        gate.notify_waiters();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        gate.notify_waiters();
        tasks.shutdown().await;
        let stats = tasks.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn spawn_after_shutdown_is_rejected() {
        let tasks = queue();
        tasks.shutdown().await;
        let result = tasks.spawn("late", async { Ok(()) }).await;
        assert!(matches!(result, Err(GatewayError::Internal(_))));
    }
}
