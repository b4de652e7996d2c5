//! Processing queue for heavy per-file work.
//!
//! Waveform extraction and lossless to mp3 conversion are queued here so a
//! scan never runs more of them at once than the configured worker count
//! (one by default). Tasks start in FIFO order.
//!
//! Each [`ProcessingQueue::enqueue`] returns a [`TaskHandle`] that resolves to
//! that task's own result. Dropping the handle is fine: the task still runs
//! and failures are logged.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::error::{Error, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded-concurrency FIFO task runner.
#[derive(Clone)]
pub struct ProcessingQueue {
    tx: mpsc::UnboundedSender<Job>,
    outstanding: Arc<watch::Sender<usize>>,
    workers: usize,
}

/// Resolves to the result of one queued task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.unwrap_or(Err(Error::QueueClosed))
    }
}

impl ProcessingQueue {
    /// Start a queue with `workers` concurrent workers (at least one).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    // Hold the lock only while taking the next job
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::debug!(target: "queue", worker, "Worker stopped");
            });
        }

        let (outstanding, _) = watch::channel(0usize);
        Self {
            tx,
            outstanding: Arc::new(outstanding),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of tasks queued or running.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Queue a task. `name` is used in logs.
    ///
    /// A failing or panicking task resolves its own handle with an error and
    /// does not affect other tasks.
    pub fn enqueue<T, F>(&self, name: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let name = name.into();
        let (result_tx, rx) = oneshot::channel();
        let outstanding = Arc::clone(&self.outstanding);

        outstanding.send_modify(|n| *n += 1);

        let job: Job = Box::pin(async move {
            tracing::debug!(target: "queue", task = %name, "Task started");

            let result = match tokio::spawn(task).await {
                Ok(result) => result,
                Err(e) => Err(Error::TaskPanicked(e.to_string())),
            };
            if let Err(e) = &result {
                tracing::warn!(target: "queue", task = %name, error = %e, "Task failed");
            }

            let _ = result_tx.send(result);
            outstanding.send_modify(|n| *n = n.saturating_sub(1));
        });

        if let Err(mpsc::error::SendError(_)) = self.tx.send(job) {
            // Workers are gone; the job (and its sender) was dropped with the error
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }

        TaskHandle { rx }
    }

    /// Wait until every queued and running task has finished.
    pub async fn flush(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
