//! Dispatch queue
//!
//! FIFO-ish transport of transaction ids from the orchestrator to the worker
//! pool. Delivery is at-least-once; duplicate enqueues of the same id are
//! allowed because `process` is idempotent per id.

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(String),
    #[error("queue is full")]
    Full,
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Append an id. Returns once the write is durable for durable backends.
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError>;
    /// Pop the oldest id, waiting up to `timeout` for one to arrive.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError>;
    /// Best-effort depth.
    async fn len(&self) -> Result<u64, QueueError>;
}

/// In-process queue for tests and single-node runs. Bounded, lock-free push,
/// notify-woken blocking pop.
pub struct MemoryQueue {
    items: ArrayQueue<Uuid>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
            notify: Notify::new(),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        self.items.push(id).map_err(|_| QueueError::Full)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.items.pop() {
                return Ok(Some(id));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Wake-ups race with other consumers; the pop above re-checks.
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
            if self.items.is_empty() && Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.items.len() as u64)
    }
}
