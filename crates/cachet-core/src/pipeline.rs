//! Asynchronous write pipeline
//!
//! Cache writes run on a fixed pool of worker tasks fed by a bounded queue.
//! When the queue is full new jobs are dropped: a lost write only means the
//! next read recomputes, while a blocked caller would slow down the
//! protected operation itself.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;

/// A unit of deferred cache work
pub type WriteJob = BoxFuture<'static, Result<(), CoreError>>;

/// Sizing of the write pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Jobs that may wait for a worker before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
        }
    }
}

/// Bounded, load-shedding executor for cache writes
pub struct WritePipeline {
    sender: Mutex<Option<mpsc::Sender<WriteJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl WritePipeline {
    /// Start the worker pool on the current tokio runtime
    pub fn new(config: PipelineConfig) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        info!(
            "Starting write pipeline ({} workers, queue capacity {})",
            workers, capacity
        );

        let (sender, receiver) = mpsc::channel::<WriteJob>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, receiver.clone())))
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a job without waiting
    ///
    /// Returns whether the job was accepted. A rejected job is dropped and
    /// logged; nothing is ever reported back to the caller's operation.
    pub fn submit(&self, job: WriteJob) -> bool {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            warn!("Write pipeline is shut down, dropping job");
            self.record_drop();
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Write pipeline saturated, dropping job");
                self.record_drop();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Write pipeline workers are gone, dropping job");
                self.record_drop();
                false
            }
        }
    }

    /// Queue a future as a job
    pub fn spawn<F>(&self, job: F) -> bool
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.submit(Box::pin(job))
    }

    /// Jobs dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in futures::future::join_all(handles).await {
            if let Err(e) = handle {
                error!("Write worker ended abnormally: {}", e);
            }
        }
        info!("Write pipeline drained");
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cachet_writes_dropped_total").increment(1);
    }
}

async fn run_worker(id: usize, receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<WriteJob>>>) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            debug!("Write worker {} stopping", id);
            return;
        };

        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!("cachet_write_failures_total").increment(1);
                warn!("Cache write failed: {}", e);
            }
            Err(_) => {
                metrics::counter!("cachet_write_failures_total").increment(1);
                error!("Cache write panicked in worker {}", id);
            }
        }
    }
}
