use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::broadcast;

use crate::dto::snapshot::LeaderboardSnapshot;
use crate::error::Result;

/// Channel name the notification transport fans out from.
pub const LEADERBOARD_CHANNEL: &str = "leaderboard_updates";

/// Best-effort, at-most-once broadcast of a ranked snapshot. No ack, no
/// retry: offline subscribers miss the update and catch the next one.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    async fn publish(&self, snapshot: &LeaderboardSnapshot) -> Result<()>;
}

pub struct PgNotifyPublisher {
    pool: PgPool,
}

impl PgNotifyPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotPublisher for PgNotifyPublisher {
    async fn publish(&self, snapshot: &LeaderboardSnapshot) -> Result<()> {
        // NOTIFY payloads are capped at ~8000 bytes; 50 trimmed entries stay
        // comfortably inside that.
        let payload = serde_json::to_string(snapshot)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(LEADERBOARD_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// In-process fan-out for single-node deployments and tests.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<LeaderboardSnapshot>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeaderboardSnapshot> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl SnapshotPublisher for BroadcastPublisher {
    async fn publish(&self, snapshot: &LeaderboardSnapshot) -> Result<()> {
        // A send error just means no subscriber is listening right now.
        let _ = self.tx.send(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::snapshot::SnapshotEntry;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        let snapshot = LeaderboardSnapshot::new(
            Uuid::new_v4(),
            vec![SnapshotEntry {
                participant_id: Uuid::new_v4(),
                name: "Ada".into(),
                kind: "individual".into(),
                score: 42,
                rank: 1,
            }],
        );
        publisher.publish(&snapshot).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, snapshot.event_id);
        assert_eq!(received.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::new(8);
        let snapshot = LeaderboardSnapshot::new(Uuid::new_v4(), Vec::new());
        assert!(publisher.publish(&snapshot).await.is_ok());
    }
}
