//! Bounded worker pool for run execution.
//!
//! `core_workers` long-lived workers consume a bounded queue. When the queue
//! is full, up to `max_workers - core_workers` overflow workers spawn for
//! single jobs; past that the submitting caller runs the job inline
//! (caller-runs saturation keeps backpressure on producers). An accepted job
//! is never dropped: workers only exit once the queue is closed and drained.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Pool sizing. Defaults: core = CPU/2 (min 1), max = CPU, queue 64.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            core_workers: (cpus / 2).max(1),
            max_workers: cpus.max(1),
            queue_capacity: 64,
        }
    }
}

/// Bounded async worker pool with caller-runs saturation.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    draining: Arc<AtomicBool>,
    overflow_slots: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let core = config.core_workers.max(1);
        let overflow = config.max_workers.saturating_sub(core);
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_index in 0..core {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => {
                            tracing::debug!(worker_index, "worker pool worker exiting");
                            return;
                        }
                    }
                }
            });
        }

        Self {
            tx,
            draining: Arc::new(AtomicBool::new(false)),
            overflow_slots: Arc::new(AtomicUsize::new(overflow)),
        }
    }

    /// Runs `fut` on the pool and awaits its result.
    ///
    /// Queue full → overflow worker when a slot is free, else the job runs on
    /// the calling task (caller-runs). The result always arrives; an accepted
    /// job is never dropped because workers drain the queue before exiting.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<T>();
        let job: Job = Box::pin(async move {
            let _ = result_tx.send(fut.await);
        });

        let queued = if self.draining.load(Ordering::SeqCst) {
            Err(job)
        } else {
            self.tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(job)
                | mpsc::error::TrySendError::Closed(job) => job,
            })
        };

        if let Err(job) = queued {
            let claimed = self
                .overflow_slots
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |slots| {
                    slots.checked_sub(1)
                })
                .is_ok();
            if claimed && !self.draining.load(Ordering::SeqCst) {
                let slots = self.overflow_slots.clone();
                tokio::spawn(async move {
                    job.await;
                    slots.fetch_add(1, Ordering::SeqCst);
                });
            } else {
                // Caller-runs: saturation (or drain-mode) backpressure.
                job.await;
            }
        }

        result_rx
            .await
            .expect("pool job sends exactly one result before completing")
    }

    /// Switches the pool to drain mode: new submissions run on the caller,
    /// already-queued jobs are still executed by the workers. Workers exit
    /// once the pool is dropped and the queue is drained.
    pub fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }
}
