use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use ingest::{IngestionWorker, Outcome, WorkerConfig};
use storage::error::{Result as StorageResult, StorageError};
use storage::idempotency::MemoryIdempotencyGuard;
use storage::models::{ParticipantRef, ScoreMessage, floor_total};
use storage::publish::BroadcastPublisher;
use storage::queue::{MemoryScoreQueue, ScoreQueue};
use storage::ranking::MemoryRankingStore;
use storage::repository::scores::{AppliedScore, ScoreStore};

/// In-memory aggregation backend mirroring the natural-key upsert and
/// recompute-from-source semantics of the Postgres repository.
#[derive(Default)]
struct MemoryScoreStore {
    records: Mutex<HashMap<(Uuid, Uuid, Uuid, String), Decimal>>,
    participants: Mutex<HashMap<Uuid, ParticipantRef>>,
    fail_next: AtomicBool,
}

impl MemoryScoreStore {
    fn register(&self, participant_id: Uuid, name: &str) {
        self.participants.lock().unwrap().insert(
            participant_id,
            ParticipantRef {
                participant_id,
                display_name: name.to_string(),
                kind: "individual".to_string(),
            },
        );
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn apply_score(&self, message: &ScoreMessage) -> StorageResult<AppliedScore> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::ConstraintViolation("store offline".into()));
        }

        let key = (
            message.event_id,
            message.participant_id,
            message.judge_user_id,
            message.criterion.clone(),
        );

        let total = {
            let mut records = self.records.lock().unwrap();
            records.insert(key, message.value);
            let sum: Decimal = records
                .iter()
                .filter(|((event, participant, _, _), _)| {
                    *event == message.event_id && *participant == message.participant_id
                })
                .map(|(_, value)| *value)
                .sum();
            floor_total(sum)
        };

        let participant = self
            .participants
            .lock()
            .unwrap()
            .get(&message.participant_id)
            .cloned()
            .ok_or(StorageError::NotFound)?;

        Ok(AppliedScore { total, participant })
    }
}

struct Harness {
    queue: Arc<MemoryScoreQueue>,
    scores: Arc<MemoryScoreStore>,
    publisher_rx: tokio::sync::broadcast::Receiver<storage::dto::snapshot::LeaderboardSnapshot>,
    worker: IngestionWorker,
}

fn harness(visibility: Duration) -> Harness {
    let queue = Arc::new(MemoryScoreQueue::new(visibility));
    let scores = Arc::new(MemoryScoreStore::default());
    let publisher = Arc::new(BroadcastPublisher::new(32));
    let publisher_rx = publisher.subscribe();

    let worker = IngestionWorker::new(
        queue.clone(),
        Arc::new(MemoryIdempotencyGuard::new()),
        scores.clone(),
        Arc::new(MemoryRankingStore::new()),
        publisher,
        WorkerConfig::default(),
    );

    Harness {
        queue,
        scores,
        publisher_rx,
        worker,
    }
}

fn score_payload(
    event: Uuid,
    participant: Uuid,
    judge: Uuid,
    criterion: &str,
    value: &str,
    idempotency_key: Option<&str>,
) -> serde_json::Value {
    json!({
        "eventId": event,
        "participantId": participant,
        "judgeUserId": judge,
        "criterion": criterion,
        "value": value,
        "comment": null,
        "idempotencyKey": idempotency_key,
    })
}

async fn drain_one(h: &Harness) -> Outcome {
    let message = h.queue.dequeue().await.unwrap().unwrap();
    h.worker.process(&message).await.unwrap()
}

#[tokio::test]
async fn test_resubmission_replaces_not_accumulates() {
    let h = harness(Duration::from_secs(30));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    h.queue
        .enqueue(score_payload(event, participant, judge, "innovation", "70", None))
        .await
        .unwrap();
    h.queue
        .enqueue(score_payload(event, participant, judge, "innovation", "85", None))
        .await
        .unwrap();

    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 70 });
    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 85 });
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_distinct_criteria_accumulate() {
    let h = harness(Duration::from_secs(30));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    h.queue
        .enqueue(score_payload(event, participant, judge, "innovation", "70.5", None))
        .await
        .unwrap();
    h.queue
        .enqueue(score_payload(event, participant, judge, "execution", "14.7", None))
        .await
        .unwrap();

    drain_one(&h).await;
    // 70.5 + 14.7 = 85.2, floored once after summation.
    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 85 });
}

#[tokio::test]
async fn test_duplicate_idempotency_key_applies_once() {
    let h = harness(Duration::from_secs(30));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    // Same write intent delivered twice, as after a producer retry.
    for _ in 0..2 {
        h.queue
            .enqueue(score_payload(
                event,
                participant,
                judge,
                "innovation",
                "70",
                Some("abc123"),
            ))
            .await
            .unwrap();
    }

    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 70 });
    assert_eq!(drain_one(&h).await, Outcome::Skipped);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_malformed_payload_rejected_and_acked() {
    let h = harness(Duration::from_secs(30));

    h.queue
        .enqueue(json!({"eventId": "not-a-uuid", "value": 1}))
        .await
        .unwrap();

    assert_eq!(drain_one(&h).await, Outcome::Rejected);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_invalid_payload_rejected_at_boundary() {
    let h = harness(Duration::from_secs(30));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    // Blank criterion fails validation before any store is touched.
    h.queue
        .enqueue(score_payload(event, participant, judge, "", "70", None))
        .await
        .unwrap();

    assert_eq!(drain_one(&h).await, Outcome::Rejected);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_failed_apply_releases_claim_for_redelivery() {
    let h = harness(Duration::from_millis(10));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    h.queue
        .enqueue(score_payload(
            event,
            participant,
            judge,
            "innovation",
            "70",
            Some("abc123"),
        ))
        .await
        .unwrap();

    // The claim succeeds but the store fails; the claim must be handed back
    // so the redelivered copy is applied instead of skipped as a duplicate.
    h.scores.fail_next.store(true, Ordering::SeqCst);
    let message = h.queue.dequeue().await.unwrap().unwrap();
    assert!(h.worker.process(&message).await.is_err());

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 70 });
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_snapshot_ranks_descend() {
    let mut h = harness(Duration::from_secs(30));
    let event = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let low = Uuid::new_v4();
    let high = Uuid::new_v4();
    h.scores.register(low, "Low");
    h.scores.register(high, "High");

    h.queue
        .enqueue(score_payload(event, low, judge, "innovation", "40", None))
        .await
        .unwrap();
    h.queue
        .enqueue(score_payload(event, high, judge, "innovation", "95", None))
        .await
        .unwrap();

    drain_one(&h).await;
    drain_one(&h).await;

    // Second snapshot reflects both standings.
    let _ = h.publisher_rx.recv().await.unwrap();
    let snapshot = h.publisher_rx.recv().await.unwrap();

    assert_eq!(snapshot.event_id, event);
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.entries[0].participant_id, high);
    assert_eq!(snapshot.entries[0].rank, 1);
    assert_eq!(snapshot.entries[1].rank, 2);
    assert!(snapshot.entries[0].score >= snapshot.entries[1].score);
}

#[tokio::test]
async fn test_store_failure_leaves_message_for_redelivery() {
    let h = harness(Duration::from_millis(10));
    let (event, participant, judge) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    h.scores.register(participant, "Ada");

    h.queue
        .enqueue(score_payload(event, participant, judge, "innovation", "70", None))
        .await
        .unwrap();

    h.scores.fail_next.store(true, Ordering::SeqCst);
    let message = h.queue.dequeue().await.unwrap().unwrap();
    assert!(h.worker.process(&message).await.is_err());
    assert!(!h.queue.is_empty());

    // Redelivered after the visibility window, then applied.
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(drain_one(&h).await, Outcome::Applied { total: 70 });
    assert!(h.queue.is_empty());
}
