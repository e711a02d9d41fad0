//! Fixed-size worker pool shared by every probe of a trace run.
//!
//! Each worker announces itself as idle by handing the pool a one-shot slot;
//! [`WorkerPool::idle_worker`] waits for such a slot and the job is then
//! started on it.
//! Work is therefore handed off only to a worker that can start it right away,
//! and the number of jobs running at once never exceeds the worker count.

use crate::TraceError;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    idle: mpsc::Receiver<oneshot::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers on the current runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (idle_tx, idle) = mpsc::channel(size);
        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, idle_tx.clone())))
            .collect();
        Self { idle, workers }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits until a worker is idle.
    ///
    /// Dropping the returned handle without starting a job retires that worker.
    pub async fn idle_worker(&mut self) -> Result<IdleWorker, TraceError> {
        self.idle
            .recv()
            .await
            .map(IdleWorker)
            .ok_or_else(|| TraceError::Internal("all workers have exited".to_string()))
    }

    /// Hands `job` to the next idle worker, waiting for one if all are busy.
    pub async fn submit<F>(&mut self, job: F) -> Result<(), TraceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);
        loop {
            match self.idle_worker().await?.start_boxed(job) {
                Ok(()) => return Ok(()),
                // The worker went away between announcing and receiving; try the next one.
                Err(returned) => job = returned,
            }
        }
    }

    /// Stops handing out work and waits for running jobs to finish.
    pub async fn shutdown(self) {
        let WorkerPool { idle, workers } = self;
        drop(idle);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Probe worker terminated abnormally");
            }
        }
    }
}

/// A worker waiting for its next job.
pub struct IdleWorker(oneshot::Sender<Job>);

impl IdleWorker {
    /// Starts `job` on this worker.
    pub fn start<F>(self, job: F) -> Result<(), TraceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start_boxed(Box::pin(job))
            .map_err(|_| TraceError::Internal("worker exited before receiving its job".to_string()))
    }

    fn start_boxed(self, job: Job) -> Result<(), Job> {
        self.0.send(job)
    }
}

async fn worker(id: usize, idle: mpsc::Sender<oneshot::Sender<Job>>) {
    loop {
        let (slot, job) = oneshot::channel();
        if idle.send(slot).await.is_err() {
            break;
        }
        match job.await {
            Ok(job) => job.await,
            Err(_) => break,
        }
    }
    trace!(worker = id, "Probe worker stopped");
}
