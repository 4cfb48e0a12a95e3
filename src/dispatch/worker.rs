//! Worker pool
//!
//! N tasks consuming the dispatch queue and driving the orchestrator, plus a
//! sweeper task that expires stale records. Shutdown is cooperative: workers
//! finish the invocation in flight and take no new dequeues.

use std::sync::Arc;
use std::time::Duration;

use super::queue::DispatchQueue;
use super::{Orchestrator, Shutdown};

/// Dequeue blocking window per loop iteration.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a queue error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn DispatchQueue>,
    workers: usize,
    sweep_interval: Duration,
    shutdown: Shutdown,
}

impl WorkerPool {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn DispatchQueue>,
        workers: usize,
        sweep_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            workers
        };
        Self {
            orchestrator,
            queue,
            workers,
            sweep_interval,
            shutdown,
        }
    }

    /// Spawn the workers and the sweeper. Returns the join handles; await
    /// them after signalling shutdown for a clean drain.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers + 1);

        for worker_id in 0..self.workers {
            let orchestrator = self.orchestrator.clone();
            let queue = self.queue.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, orchestrator, queue, shutdown).await;
            }));
        }

        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.sweep_interval;
        handles.push(tokio::spawn(async move {
            sweeper_loop(orchestrator, interval, shutdown).await;
        }));

        tracing::info!(workers = self.workers, "worker pool started");
        handles
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

async fn worker_loop(
    worker_id: usize,
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn DispatchQueue>,
    shutdown: Shutdown,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        let dequeued = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            dequeued = queue.dequeue(DEQUEUE_TIMEOUT) => dequeued,
        };

        match dequeued {
            Ok(Some(id)) => {
                let started = tokio::time::Instant::now();
                match orchestrator.process(id).await {
                    Ok(()) => {
                        tracing::debug!(
                            worker_id,
                            trx_id = %id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "queued transaction processed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(worker_id, trx_id = %id, error = %e, "failed to process queued transaction");
                    }
                }
            }
            Ok(None) => {} // idle window, loop
            Err(e) => {
                tracing::error!(worker_id, error = %e, "dequeue failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    tracing::info!(worker_id, "worker stopped");
}

async fn sweeper_loop(orchestrator: Arc<Orchestrator>, interval: Duration, shutdown: Shutdown) {
    loop {
        let sleep = tokio::time::sleep(interval);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = sleep => {}
        }
        match orchestrator.expire_stale().await {
            Ok(0) => {}
            Ok(swept) => tracing::warn!(swept, "expired stale transactions"),
            Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
        }
    }
    tracing::info!("sweeper stopped");
}
