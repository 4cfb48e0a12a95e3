//! Durable dispatch queue
//!
//! Backed by a plain table: enqueue is a committed insert, dequeue pops the
//! oldest row with `FOR UPDATE SKIP LOCKED` so concurrent workers never hand
//! out the same row twice. The blocking-pop contract is met by polling
//! until the caller's deadline.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dispatch::{DispatchQueue, QueueError};

/// Default poll spacing while waiting for work.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct PgDispatchQueue {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgDispatchQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn pop(&self) -> Result<Option<Uuid>, QueueError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM dispatch_queue
            WHERE seq = (
                SELECT seq FROM dispatch_queue
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING transaction_id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl DispatchQueue for PgDispatchQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO dispatch_queue (transaction_id, enqueued_at) VALUES ($1, NOW())")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.pop().await? {
                return Ok(Some(id));
            }
            if Instant::now() + self.poll_interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dispatch_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
