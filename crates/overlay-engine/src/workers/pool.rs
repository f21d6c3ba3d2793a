//! Fixed-size worker pool.
//!
//! Requests go through a bounded queue that all workers pull from, so a
//! producer submitting faster than the workers drain waits in
//! [`WorkerPool::submit`]. Jobs run on Tokio's blocking threads. A job that
//! panics is reported to its caller as [`WorkerResponse::Crashed`] and the
//! worker that ran it is replaced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::{BoxFuture, FutureExt};
use overlay_core::{OverlayError, Result};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::jobs::run_job;
use super::protocol::{BatchResult, WorkerRequest, WorkerResponse};

/// Function a worker applies to every request
pub type Executor = Arc<dyn Fn(&WorkerRequest) -> Result<BatchResult> + Send + Sync>;

struct Job {
    request: WorkerRequest,
    reply: oneshot::Sender<WorkerResponse>,
}

struct Shared {
    receiver: Mutex<mpsc::Receiver<Job>>,
    executor: Executor,
    next_worker_id: AtomicUsize,
    replaced: AtomicUsize,
}

pub struct WorkerPool {
    sender: StdMutex<Option<mpsc::Sender<Job>>>,
    shared: Arc<Shared>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("replaced", &self.replaced_workers())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool running the standard batch jobs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(size: usize, queue_capacity: usize) -> Result<Self> {
        Self::with_executor(size, queue_capacity, Arc::new(run_job))
    }

    /// Start a pool running a custom executor
    pub fn with_executor(size: usize, queue_capacity: usize, executor: Executor) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| OverlayError::WorkerFailed {
            message: format!("cannot start worker pool: {e}"),
        })?;
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let shared = Arc::new(Shared {
            receiver: Mutex::new(receiver),
            executor,
            next_worker_id: AtomicUsize::new(size),
            replaced: AtomicUsize::new(0),
        });
        for worker_id in 0..size {
            handle.spawn(worker_task(worker_id, Arc::clone(&shared)));
        }
        tracing::debug!(size, queue_capacity, "Started worker pool");
        Ok(Self { sender: StdMutex::new(Some(sender)), shared, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers started to replace crashed ones
    pub fn replaced_workers(&self) -> usize {
        self.shared.replaced.load(Ordering::Relaxed)
    }

    /// True when the queue is full and the next submit will wait
    pub fn is_saturated(&self) -> bool {
        match self.sender.lock() {
            Ok(sender) => sender.as_ref().is_some_and(|s| s.capacity() == 0),
            Err(_) => false,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>> {
        self.sender
            .lock()
            .ok()
            .and_then(|sender| sender.clone())
            .ok_or(OverlayError::PoolClosed)
    }

    /// Queue a request, waiting while the queue is full.
    ///
    /// The returned receiver resolves once a worker has handled the request.
    pub async fn submit(&self, request: WorkerRequest) -> Result<oneshot::Receiver<WorkerResponse>> {
        let sender = self.sender()?;
        let (reply, receiver) = oneshot::channel();
        sender.send(Job { request, reply }).await.map_err(|_| OverlayError::PoolClosed)?;
        Ok(receiver)
    }

    /// Submit a request and wait for its result
    pub async fn run(&self, request: WorkerRequest) -> Result<BatchResult> {
        let receiver = self.submit(request).await?;
        receiver.await.map_err(|_| OverlayError::PoolClosed)?.into_result()
    }

    /// Stop accepting requests. Queued requests are still processed.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

fn worker_task(worker_id: usize, shared: Arc<Shared>) -> BoxFuture<'static, ()> {
    async move {
        loop {
            let job = {
                let mut receiver = shared.receiver.lock().await;
                receiver.recv().await
            };
            let Some(Job { request, reply }) = job else {
                tracing::debug!(worker_id, "Worker queue closed");
                return;
            };

            let executor = Arc::clone(&shared.executor);
            let outcome = tokio::task::spawn_blocking(move || executor(&request)).await;
            match outcome {
                Ok(Ok(result)) => {
                    let _ = reply.send(WorkerResponse::Ok(result));
                }
                Ok(Err(e)) => {
                    let _ = reply.send(WorkerResponse::Error { message: e.to_string() });
                }
                Err(e) => {
                    let replacement = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(worker_id, replacement, error = %e, "Worker crashed, starting a replacement");
                    let _ = reply.send(WorkerResponse::Crashed { worker_id });
                    shared.replaced.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(worker_task(replacement, Arc::clone(&shared)));
                    return;
                }
            }
        }
    }
    .boxed()
}
