use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::shutdown::{ShutdownHandle, ShutdownListener};

type Job = BoxFuture<'static, ()>;

/// The pool stopped accepting work, either because it was closed or because it was shut down.
#[derive(derive_more::Error, derive_more::Display, Debug, Default)]
#[display("worker pool is closed")]
pub struct PoolClosedError;

/// A fixed number of workers draining a bounded queue.
///
/// Health follow ups of ingestion are admitted here. Once the queue holds
/// `queue_capacity` jobs, [`WorkerPool::submit`] waits for space, so callers are slowed down
/// rather than the queue growing without bound.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: ShutdownHandle,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.lock().len())
            .field("queue_capacity", &self.sender.max_capacity())
            .finish()
    }
}

impl WorkerPool {
    /// Start the workers on the current tokio runtime.
    ///
    /// Both `workers` and `queue_capacity` are raised to at least 1.
    pub fn new(workers: usize, queue_capacity: usize, shutdown: ShutdownHandle) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let listener = shutdown.new_listener();
                tokio::spawn(run_worker(id, receiver, listener))
            })
            .collect();

        log::debug!("Started worker pool with {workers} workers and queue capacity {queue_capacity}");

        Self {
            sender,
            workers: Mutex::new(handles),
            shutdown,
        }
    }

    /// Queue a future, waiting for queue space if the pool is saturated.
    ///
    /// The returned receiver yields the future's output. It reports an error if the job was
    /// dropped before running, which happens when the pool is shut down.
    pub async fn submit<F, T>(&self, fut: F) -> Result<oneshot::Receiver<T>, PoolClosedError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (job, result) = wrap(fut);
        self.sender.send(job).await.map_err(|_| PoolClosedError)?;
        Ok(result)
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub async fn close(self) {
        let WorkerPool {
            sender,
            workers,
            shutdown,
        } = self;
        drop(sender);

        let handles = std::mem::take(&mut *workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("Worker exited abnormally: {e:?}");
            }
        }

        // Dropping the handle releases the workers' listeners, so it has to outlive the drain.
        drop(shutdown);
    }

    /// Signal the workers to stop after their current job. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

fn wrap<F, T>(fut: F) -> (Job, oneshot::Receiver<T>)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let job = async move {
        // The caller may have stopped waiting for the result.
        let _ = tx.send(fut.await);
    }
    .boxed();

    (job, rx)
}

async fn run_worker(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    listener: ShutdownListener,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                job = receiver.recv() => job,
                _ = listener.wait() => None,
            }
        };

        match job {
            Some(job) => job.await,
            None => break,
        }
    }

    log::trace!("Worker {id} stopped");
}
