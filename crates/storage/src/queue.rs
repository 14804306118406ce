use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

/// A claimed queue message. The payload stays raw JSON so malformed writes
/// can be rejected at the consumption boundary instead of deep in
/// aggregation.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedScore {
    pub message_id: Uuid,
    pub payload: Value,
}

/// At-least-once work queue feeding the ingestion workers. `dequeue` claims
/// a message for the visibility window; a message that is never acked
/// becomes eligible for redelivery once the window lapses.
#[async_trait]
pub trait ScoreQueue: Send + Sync {
    async fn enqueue(&self, payload: Value) -> Result<Uuid>;
    async fn dequeue(&self) -> Result<Option<QueuedScore>>;
    async fn ack(&self, message_id: Uuid) -> Result<()>;
}

pub struct PgScoreQueue {
    pool: PgPool,
    visibility: Duration,
}

impl PgScoreQueue {
    pub fn new(pool: PgPool, visibility: Duration) -> Self {
        Self { pool, visibility }
    }
}

#[async_trait]
impl ScoreQueue for PgScoreQueue {
    async fn enqueue(&self, payload: Value) -> Result<Uuid> {
        let message_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO score_queue (message_id, payload, enqueued_at, available_at)
            VALUES ($1, $2, now(), now())
            "#,
        )
        .bind(message_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(message_id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedScore>> {
        // SKIP LOCKED keeps concurrent workers from claiming the same row;
        // pushing available_at forward is the visibility timeout.
        let message = sqlx::query_as::<_, QueuedScore>(
            r#"
            UPDATE score_queue
            SET available_at = now() + make_interval(secs => $1)
            WHERE message_id = (
                SELECT message_id
                FROM score_queue
                WHERE available_at <= now()
                ORDER BY enqueued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING message_id, payload
            "#,
        )
        .bind(self.visibility.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn ack(&self, message_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM score_queue WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<QueuedScore>,
    in_flight: HashMap<Uuid, (QueuedScore, Instant)>,
}

/// In-process queue used in tests and single-node deployments. Mirrors the
/// redelivery semantics of the Postgres backend.
pub struct MemoryScoreQueue {
    state: Mutex<MemoryQueueState>,
    visibility: Duration,
}

impl MemoryScoreQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryQueueState::default()),
            visibility,
        }
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.ready.is_empty() && state.in_flight.is_empty()
    }
}

#[async_trait]
impl ScoreQueue for MemoryScoreQueue {
    async fn enqueue(&self, payload: Value) -> Result<Uuid> {
        let message_id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.ready.push_back(QueuedScore {
            message_id,
            payload,
        });
        Ok(message_id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedScore>> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        let lapsed: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, (_, redeliver_at))| *redeliver_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in lapsed {
            if let Some((message, _)) = state.in_flight.remove(&id) {
                state.ready.push_back(message);
            }
        }

        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .insert(message.message_id, (message.clone(), now + self.visibility));

        Ok(Some(message))
    }

    async fn ack(&self, message_id: Uuid) -> Result<()> {
        self.state.lock().unwrap().in_flight.remove(&message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = MemoryScoreQueue::new(Duration::from_secs(30));
        queue.enqueue(json!({"value": 1})).await.unwrap();

        let message = queue.dequeue().await.unwrap().unwrap();
        queue.ack(message.message_id).await.unwrap();

        assert!(queue.is_empty());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unacked_message_redelivers() {
        let queue = MemoryScoreQueue::new(Duration::from_millis(10));
        let id = queue.enqueue(json!({"value": 1})).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.message_id, id);

        // Claimed, so invisible until the window lapses.
        assert!(queue.dequeue().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(25)).await;
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.message_id, id);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryScoreQueue::new(Duration::from_secs(30));
        let a = queue.enqueue(json!({"n": 1})).await.unwrap();
        let b = queue.enqueue(json!({"n": 2})).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().message_id, a);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().message_id, b);
    }
}
