use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use validator::Validate;

use storage::dto::snapshot::{LeaderboardSnapshot, SnapshotEntry};
use storage::idempotency::IdempotencyGuard;
use storage::models::ScoreMessage;
use storage::publish::SnapshotPublisher;
use storage::queue::{QueuedScore, ScoreQueue};
use storage::ranking::{RankedScore, RankingStore};
use storage::repository::scores::ScoreStore;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How many ranked entries each broadcast snapshot carries.
    pub publish_top_k: usize,
    pub idempotency_ttl: Duration,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            publish_top_k: 50,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What processing one queue message came to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Record upserted, total recomputed, ranking updated, snapshot sent.
    Applied { total: i64 },
    /// Duplicate idempotency key; dropped without touching totals.
    Skipped,
    /// Payload failed parsing or validation at the boundary; dropped.
    Rejected,
}

/// Consumes the score queue one message at a time:
/// Received -> (duplicate? Skip) -> Aggregated -> RankUpdated -> Published -> Acked.
///
/// Many instances may run in parallel; every step coordinates through the
/// shared stores, never through process memory. A failure before the
/// recompute leaves the message unacked so the queue redelivers it.
pub struct IngestionWorker {
    queue: Arc<dyn ScoreQueue>,
    guard: Arc<dyn IdempotencyGuard>,
    scores: Arc<dyn ScoreStore>,
    ranking: Arc<dyn RankingStore>,
    publisher: Arc<dyn SnapshotPublisher>,
    config: WorkerConfig,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn ScoreQueue>,
        guard: Arc<dyn IdempotencyGuard>,
        scores: Arc<dyn ScoreStore>,
        ranking: Arc<dyn RankingStore>,
        publisher: Arc<dyn SnapshotPublisher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            guard,
            scores,
            ranking,
            publisher,
            config,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("score ingestion worker started");

        loop {
            match self.queue.dequeue().await {
                Ok(Some(message)) => {
                    let message_id = message.message_id;
                    if let Err(err) = self.process(&message).await {
                        // Not acked: the queue redelivers after the
                        // visibility window.
                        error!(%message_id, error = %err, "score ingestion failed; awaiting redelivery");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    warn!(error = %err, "queue unreachable; backing off");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    pub async fn process(&self, queued: &QueuedScore) -> Result<Outcome> {
        let message: ScoreMessage = match serde_json::from_value(queued.payload.clone()) {
            Ok(message) => message,
            Err(err) => {
                warn!(message_id = %queued.message_id, error = %err, "rejecting malformed score payload");
                self.queue.ack(queued.message_id).await?;
                return Ok(Outcome::Rejected);
            }
        };

        if let Err(err) = message.validate() {
            warn!(message_id = %queued.message_id, error = %err, "rejecting invalid score payload");
            self.queue.ack(queued.message_id).await?;
            return Ok(Outcome::Rejected);
        }

        let mut held_claim = None;
        if let Some(key) = message.claim_key() {
            match self.guard.claim(key, self.config.idempotency_ttl).await {
                Ok(true) => held_claim = Some(key.to_string()),
                Ok(false) => {
                    debug!(%key, "duplicate score write; skipping");
                    self.queue.ack(queued.message_id).await?;
                    return Ok(Outcome::Skipped);
                }
                // Fail open: the aggregator recomputes from source, so a
                // double-applied write wastes work instead of corrupting
                // totals.
                Err(err) => {
                    warn!(%key, error = %err, "idempotency store unreachable; proceeding");
                }
            }
        }

        match self.apply(queued, &message).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // The write never landed, so hand the claim back; otherwise
                // the redelivered copy would be skipped as a duplicate for
                // the rest of the claim TTL and the score would be lost.
                if let Some(key) = held_claim {
                    if let Err(release_err) = self.guard.release(&key).await {
                        warn!(%key, error = %release_err, "failed to release idempotency claim");
                    }
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, queued: &QueuedScore, message: &ScoreMessage) -> Result<Outcome> {
        let applied = self.scores.apply_score(message).await?;

        self.ranking
            .upsert(
                message.event_id,
                RankedScore {
                    participant_id: applied.participant.participant_id,
                    display_name: applied.participant.display_name.clone(),
                    kind: applied.participant.kind.clone(),
                    score: applied.total,
                },
            )
            .await?;

        let top = self
            .ranking
            .top_k(message.event_id, self.config.publish_top_k)
            .await?;
        let entries = top
            .into_iter()
            .enumerate()
            .map(|(index, entry)| SnapshotEntry {
                participant_id: entry.participant_id,
                name: entry.display_name,
                kind: entry.kind,
                score: entry.score,
                rank: index as i64 + 1,
            })
            .collect();
        let snapshot = LeaderboardSnapshot::new(message.event_id, entries);

        // Broadcast is a notification hint, not a transactional guarantee;
        // the read path self-heals any missed snapshot within one cache TTL.
        if let Err(err) = self.publisher.publish(&snapshot).await {
            warn!(event_id = %message.event_id, error = %err, "snapshot broadcast failed");
        }

        self.queue.ack(queued.message_id).await?;

        debug!(
            event_id = %message.event_id,
            participant_id = %message.participant_id,
            total = applied.total,
            "score applied"
        );

        Ok(Outcome::Applied {
            total: applied.total,
        })
    }
}
