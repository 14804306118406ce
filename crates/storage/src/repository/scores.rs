use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{ParticipantRef, ScoreMessage, floor_total};

/// Result of applying one score write: the recomputed total plus the
/// participant metadata the ranking store wants denormalized.
#[derive(Debug, Clone)]
pub struct AppliedScore {
    pub total: i64,
    pub participant: ParticipantRef,
}

/// The aggregation seam the ingestion worker writes through. Applying a
/// score upserts the record by its natural key and recomputes the total as a
/// sum over all of the participant's records, never as an increment, so
/// duplicate delivery can only waste work, not corrupt totals.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn apply_score(&self, message: &ScoreMessage) -> Result<AppliedScore>;
}

pub struct ScoreRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ScoreRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a score record by its (event, participant, judge, criterion)
    /// natural key. An unchanged resubmission is a no-op.
    pub async fn upsert_record(&self, message: &ScoreMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO score_records
                (score_id, event_id, participant_id, judge_id, criterion, value, comment, idempotency_key, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            ON CONFLICT (event_id, participant_id, judge_id, criterion) DO UPDATE
                SET value = EXCLUDED.value,
                    comment = EXCLUDED.comment,
                    idempotency_key = EXCLUDED.idempotency_key,
                    updated_at = now()
                WHERE score_records.value IS DISTINCT FROM EXCLUDED.value
                   OR score_records.comment IS DISTINCT FROM EXCLUDED.comment
                   OR score_records.idempotency_key IS DISTINCT FROM EXCLUDED.idempotency_key
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.event_id)
        .bind(message.participant_id)
        .bind(message.judge_user_id)
        .bind(&message.criterion)
        .bind(message.value)
        .bind(&message.comment)
        .bind(&message.idempotency_key)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Recompute the authoritative total from the source of truth. Floored
    /// once, after summation.
    pub async fn total_for(&self, event_id: Uuid, participant_id: Uuid) -> Result<i64> {
        let sum = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(value), 0)
            FROM score_records
            WHERE event_id = $1 AND participant_id = $2
            "#,
        )
        .bind(event_id)
        .bind(participant_id)
        .fetch_one(self.pool)
        .await?;

        Ok(floor_total(sum))
    }

    pub async fn participant_ref(&self, participant_id: Uuid) -> Result<ParticipantRef> {
        sqlx::query_as::<_, ParticipantRef>(
            r#"
            SELECT participant_id, display_name, kind
            FROM participants
            WHERE participant_id = $1
            "#,
        )
        .bind(participant_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::NotFound)
    }
}

/// Postgres-backed [`ScoreStore`]. The upsert and the recompute are separate
/// statements on purpose: no lock is held across the round trips.
pub struct PgScoreStore {
    pool: PgPool,
}

impl PgScoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScoreStore for PgScoreStore {
    async fn apply_score(&self, message: &ScoreMessage) -> Result<AppliedScore> {
        let repo = ScoreRepository::new(&self.pool);

        repo.upsert_record(message).await?;
        let total = repo
            .total_for(message.event_id, message.participant_id)
            .await?;
        let participant = repo.participant_ref(message.participant_id).await?;

        Ok(AppliedScore { total, participant })
    }
}
